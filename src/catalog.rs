use serde::{Deserialize, Serialize};

/// Threshold category of a query kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    IdentifierLookup,
    TwoHop,
    ThreeHop,
    SixHop,
    PropertyWrite,
    RelationshipWrite,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdentifierLookup => "identifier_lookup",
            Self::TwoHop => "two_hop",
            Self::ThreeHop => "three_hop",
            Self::SixHop => "six_hop",
            Self::PropertyWrite => "property_write",
            Self::RelationshipWrite => "relationship_write",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "identifier_lookup" => Some(Self::IdentifierLookup),
            "two_hop" => Some(Self::TwoHop),
            "three_hop" => Some(Self::ThreeHop),
            "six_hop" => Some(Self::SixHop),
            "property_write" => Some(Self::PropertyWrite),
            "relationship_write" => Some(Self::RelationshipWrite),
            _ => None,
        }
    }

    pub fn top(self) -> TopCategory {
        match self {
            Self::IdentifierLookup => TopCategory::Lookup,
            Self::TwoHop | Self::ThreeHop | Self::SixHop => TopCategory::Analytics,
            Self::PropertyWrite | Self::RelationshipWrite => TopCategory::Write,
        }
    }
}

/// Top-level mix category a pattern allocates weight over.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopCategory {
    Lookup,
    Analytics,
    Write,
}

impl TopCategory {
    pub const ALL: [TopCategory; 3] = [Self::Lookup, Self::Analytics, Self::Write];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Analytics => "analytics",
            Self::Write => "write",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Which parameter the dataset selector binds into the path or body.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamSlot {
    AirIdentifier,
    SeaIdentifier,
    Country,
    WritePayload,
}

#[derive(Copy, Clone, Debug)]
pub struct QueryKind {
    pub id: &'static str,
    pub category: Category,
    pub method: HttpMethod,
    pub path_template: &'static str,
    pub slot: ParamSlot,
    /// Relative draw weight within the kind's top-level category.
    pub weight: u32,
}

impl QueryKind {
    /// Resolves the path template with a bound value and optional database
    /// routing prefix.
    pub fn path(&self, value: &str, db_prefix: Option<&str>) -> String {
        let path = self.path_template.replace("{v}", value);
        match db_prefix {
            Some(prefix) => format!("/{}{}", prefix.trim_matches('/'), path),
            None => path,
        }
    }
}

// Draw weights give the analytics split 60/30/10 across two-hop, three-hop
// and six-hop traversals, with the two two-hop kinds sharing evenly.
static STANDARD_KINDS: [QueryKind; 8] = [
    QueryKind {
        id: "mode_s",
        category: Category::IdentifierLookup,
        method: HttpMethod::Get,
        path_template: "/api/aircraft/mode_s/{v}",
        slot: ParamSlot::AirIdentifier,
        weight: 50,
    },
    QueryKind {
        id: "mmsi",
        category: Category::IdentifierLookup,
        method: HttpMethod::Get,
        path_template: "/api/ship/mmsi/{v}",
        slot: ParamSlot::SeaIdentifier,
        weight: 50,
    },
    QueryKind {
        id: "country_two_hop",
        category: Category::TwoHop,
        method: HttpMethod::Get,
        path_template: "/api/aircraft/country/{v}",
        slot: ParamSlot::Country,
        weight: 30,
    },
    QueryKind {
        id: "activity_history",
        category: Category::TwoHop,
        method: HttpMethod::Get,
        path_template: "/api/activity/mmsi/{v}",
        slot: ParamSlot::SeaIdentifier,
        weight: 30,
    },
    QueryKind {
        id: "cross_domain",
        category: Category::ThreeHop,
        method: HttpMethod::Get,
        path_template: "/api/cross-domain/country/{v}",
        slot: ParamSlot::Country,
        weight: 30,
    },
    QueryKind {
        id: "network_reach",
        category: Category::SixHop,
        method: HttpMethod::Get,
        path_template: "/api/network/country/{v}",
        slot: ParamSlot::Country,
        weight: 10,
    },
    QueryKind {
        id: "activity_log",
        category: Category::PropertyWrite,
        method: HttpMethod::Post,
        path_template: "/api/activity/log",
        slot: ParamSlot::WritePayload,
        weight: 70,
    },
    QueryKind {
        id: "sighting_link",
        category: Category::RelationshipWrite,
        method: HttpMethod::Post,
        path_template: "/api/activity/link",
        slot: ParamSlot::WritePayload,
        weight: 30,
    },
];

/// The query kinds the SUT exposes.
#[derive(Copy, Clone, Debug)]
pub struct Catalog {
    kinds: &'static [QueryKind],
}

impl Catalog {
    pub fn standard() -> Self {
        Self {
            kinds: &STANDARD_KINDS,
        }
    }

    pub fn kinds(&self) -> &'static [QueryKind] {
        self.kinds
    }

    pub fn get(&self, id: &str) -> Option<&'static QueryKind> {
        self.kinds.iter().find(|k| k.id == id)
    }

    pub fn kinds_in_top(&self, top: TopCategory) -> Vec<&'static QueryKind> {
        self.kinds.iter().filter(|k| k.category.top() == top).collect()
    }

    /// The kind whose p99 stands in for a category in crossover analysis.
    pub fn representative(&self, category: Category) -> &'static QueryKind {
        let id = match category {
            Category::IdentifierLookup => "mode_s",
            Category::TwoHop => "country_two_hop",
            Category::ThreeHop => "cross_domain",
            Category::SixHop => "network_reach",
            Category::PropertyWrite => "activity_log",
            Category::RelationshipWrite => "sighting_link",
        };
        self.kinds
            .iter()
            .find(|k| k.id == id)
            .unwrap_or(&self.kinds[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_kinds_are_present() {
        let catalog = Catalog::standard();
        for (id, category, method, path) in [
            ("mode_s", Category::IdentifierLookup, HttpMethod::Get, "/api/aircraft/mode_s/{v}"),
            ("mmsi", Category::IdentifierLookup, HttpMethod::Get, "/api/ship/mmsi/{v}"),
            ("country_two_hop", Category::TwoHop, HttpMethod::Get, "/api/aircraft/country/{v}"),
            ("cross_domain", Category::ThreeHop, HttpMethod::Get, "/api/cross-domain/country/{v}"),
            ("activity_history", Category::TwoHop, HttpMethod::Get, "/api/activity/mmsi/{v}"),
            ("activity_log", Category::PropertyWrite, HttpMethod::Post, "/api/activity/log"),
        ] {
            let kind = catalog.get(id).unwrap_or_else(|| panic!("missing kind {id}"));
            assert_eq!(kind.category, category);
            assert_eq!(kind.method, method);
            assert_eq!(kind.path_template, path);
        }
    }

    #[test]
    fn every_top_category_has_kinds() {
        let catalog = Catalog::standard();
        for top in TopCategory::ALL {
            assert!(!catalog.kinds_in_top(top).is_empty(), "no kinds for {}", top.as_str());
        }
    }

    #[test]
    fn analytics_weights_split_sixty_thirty_ten() {
        let catalog = Catalog::standard();
        let total: u32 = catalog
            .kinds_in_top(TopCategory::Analytics)
            .iter()
            .map(|k| k.weight)
            .sum();
        let weight_of = |c: Category| -> u32 {
            catalog
                .kinds()
                .iter()
                .filter(|k| k.category == c)
                .map(|k| k.weight)
                .sum()
        };
        assert_eq!(weight_of(Category::TwoHop) * 100 / total, 60);
        assert_eq!(weight_of(Category::ThreeHop) * 100 / total, 30);
        assert_eq!(weight_of(Category::SixHop) * 100 / total, 10);
    }

    #[test]
    fn path_binding_applies_prefix_and_value() {
        let catalog = Catalog::standard();
        let kind = catalog.get("mode_s").unwrap();
        assert_eq!(kind.path("A00001", None), "/api/aircraft/mode_s/A00001");
        assert_eq!(
            kind.path("A00001", Some("neo4j")),
            "/neo4j/api/aircraft/mode_s/A00001"
        );
        let write = catalog.get("activity_log").unwrap();
        assert_eq!(write.path("", Some("/pg/")), "/pg/api/activity/log");
    }

    #[test]
    fn representatives_match_their_category() {
        let catalog = Catalog::standard();
        for kind in catalog.kinds() {
            let rep = catalog.representative(kind.category);
            assert_eq!(rep.category, kind.category);
        }
    }
}
