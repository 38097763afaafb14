use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::catalog::{Catalog, ParamSlot, QueryKind, TopCategory};
use crate::dataset::DatasetSelector;
use crate::error::BenchError;

/// Named allocation of request share across the three top-level categories.
/// Weights always sum to 100.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixPattern {
    pub name: String,
    pub lookup: u32,
    pub analytics: u32,
    pub write: u32,
}

pub const BUILTIN_PATTERNS: &[(&str, u32, u32, u32)] = &[
    ("lookup-95", 95, 4, 1),
    ("lookup-90", 90, 8, 2),
    ("lookup-85", 85, 12, 3),
    ("lookup-80", 80, 15, 5),
    ("lookup-75", 75, 20, 5),
    ("balanced-60", 60, 35, 5),
    ("balanced-50", 50, 40, 10),
    ("balanced-40", 40, 45, 15),
    ("analytics-30", 30, 60, 10),
    ("analytics-20", 20, 70, 10),
    ("analytics-10", 10, 80, 10),
    ("write-30", 50, 20, 30),
    ("write-40", 40, 20, 40),
    ("write-50", 30, 20, 50),
];

impl MixPattern {
    pub fn new(name: impl Into<String>, lookup: u32, analytics: u32, write: u32) -> Result<Self, BenchError> {
        let pattern = Self {
            name: name.into(),
            lookup,
            analytics,
            write,
        };
        pattern.validate()?;
        Ok(pattern)
    }

    pub fn named(name: &str) -> Option<Self> {
        BUILTIN_PATTERNS
            .iter()
            .find(|(n, _, _, _)| *n == name)
            .map(|&(n, l, a, w)| Self {
                name: n.to_string(),
                lookup: l,
                analytics: a,
                write: w,
            })
    }

    /// Resolves a builtin name, or an ad-hoc `lookup/analytics/write` triple
    /// such as `55/35/10`.
    pub fn parse(spec: &str) -> Result<Self, BenchError> {
        if let Some(pattern) = Self::named(spec) {
            return Ok(pattern);
        }
        let parts: Vec<&str> = spec.split('/').collect();
        if parts.len() != 3 {
            return Err(BenchError::InvalidPattern(format!(
                "{spec:?} is neither a builtin pattern nor a lookup/analytics/write triple"
            )));
        }
        let mut weights = [0u32; 3];
        for (i, part) in parts.iter().enumerate() {
            let value: i64 = part
                .trim()
                .parse()
                .map_err(|_| BenchError::InvalidPattern(format!("non-numeric weight {part:?} in {spec:?}")))?;
            if value < 0 {
                return Err(BenchError::InvalidPattern(format!(
                    "negative weight {value} in {spec:?}"
                )));
            }
            weights[i] = value as u32;
        }
        Self::new(spec.to_string(), weights[0], weights[1], weights[2])
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        let sum = self.lookup + self.analytics + self.write;
        if sum != 100 {
            return Err(BenchError::InvalidPattern(format!(
                "weights of {} sum to {sum}, expected 100",
                self.name
            )));
        }
        Ok(())
    }

    pub fn weight(&self, top: TopCategory) -> u32 {
        match top {
            TopCategory::Lookup => self.lookup,
            TopCategory::Analytics => self.analytics,
            TopCategory::Write => self.write,
        }
    }

    /// The category holding the largest share, used to pick the
    /// representative kind for crossover analysis.
    pub fn dominant(&self) -> TopCategory {
        TopCategory::ALL
            .into_iter()
            .max_by_key(|top| self.weight(*top))
            .unwrap_or(TopCategory::Lookup)
    }
}

/// A concrete request ready for issuance.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub ordinal: u64,
    pub kind: &'static QueryKind,
    pub value: String,
    pub body: Option<serde_json::Value>,
}

/// Lazy producer of `RequestPlan`s: exactly `budget` plans, drawn by
/// weighted category choice and bound through the dataset selector.
/// Restartable only by constructing afresh with the same seed.
pub struct WorkloadGenerator {
    catalog: Catalog,
    selector: DatasetSelector,
    rng: StdRng,
    budget: u64,
    emitted: u64,
    top_index: WeightedIndex<u32>,
    kind_choices: Vec<(Vec<&'static QueryKind>, WeightedIndex<u32>)>,
}

impl WorkloadGenerator {
    pub fn new(
        catalog: Catalog,
        pattern: &MixPattern,
        selector: DatasetSelector,
        budget: u64,
        seed: u64,
    ) -> Result<Self, BenchError> {
        pattern.validate()?;
        if budget == 0 {
            return Err(BenchError::InvalidPattern(
                "request budget must be positive".into(),
            ));
        }

        let top_weights: Vec<u32> = TopCategory::ALL.iter().map(|t| pattern.weight(*t)).collect();
        let top_index = WeightedIndex::new(&top_weights)
            .map_err(|e| BenchError::InvalidPattern(format!("unusable weights in {}: {e}", pattern.name)))?;

        let mut kind_choices = Vec::with_capacity(TopCategory::ALL.len());
        for top in TopCategory::ALL {
            let kinds = catalog.kinds_in_top(top);
            let weights: Vec<u32> = kinds.iter().map(|k| k.weight).collect();
            let index = WeightedIndex::new(&weights).map_err(|e| {
                BenchError::Invariant(format!("catalogue weights for {} unusable: {e}", top.as_str()))
            })?;
            kind_choices.push((kinds, index));
        }

        Ok(Self {
            catalog,
            selector,
            rng: StdRng::seed_from_u64(seed),
            budget,
            emitted: 0,
            top_index,
            kind_choices,
        })
    }

    pub fn selector(&self) -> &DatasetSelector {
        &self.selector
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog
    }

    fn draw(&mut self) -> RequestPlan {
        let top = self.top_index.sample(&mut self.rng);
        let (kinds, index) = &self.kind_choices[top];
        let kind = kinds[index.sample(&mut self.rng)];

        let (value, body) = match kind.slot {
            ParamSlot::WritePayload => (
                String::new(),
                Some(self.selector.pick_write_payload(kind, &mut self.rng)),
            ),
            slot => (self.selector.pick_identifier(slot, &mut self.rng), None),
        };

        let plan = RequestPlan {
            ordinal: self.emitted,
            kind,
            value,
            body,
        };
        self.emitted += 1;
        plan
    }
}

impl Iterator for WorkloadGenerator {
    type Item = RequestPlan;

    fn next(&mut self) -> Option<RequestPlan> {
        if self.emitted >= self.budget {
            return None;
        }
        Some(self.draw())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.budget - self.emitted) as usize;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn generator(pattern: &str, budget: u64, seed: u64) -> WorkloadGenerator {
        WorkloadGenerator::new(
            Catalog::standard(),
            &MixPattern::parse(pattern).unwrap(),
            DatasetSelector::synthetic(),
            budget,
            seed,
        )
        .unwrap()
    }

    #[test]
    fn builtin_patterns_are_present_verbatim() {
        let expected = [
            ("lookup-95", 95, 4, 1),
            ("lookup-90", 90, 8, 2),
            ("lookup-85", 85, 12, 3),
            ("lookup-80", 80, 15, 5),
            ("lookup-75", 75, 20, 5),
            ("balanced-60", 60, 35, 5),
            ("balanced-50", 50, 40, 10),
            ("balanced-40", 40, 45, 15),
            ("analytics-30", 30, 60, 10),
            ("analytics-20", 20, 70, 10),
            ("analytics-10", 10, 80, 10),
            ("write-30", 50, 20, 30),
            ("write-40", 40, 20, 40),
            ("write-50", 30, 20, 50),
        ];
        assert_eq!(BUILTIN_PATTERNS.len(), expected.len());
        for (name, lookup, analytics, write) in expected {
            let p = MixPattern::named(name).unwrap_or_else(|| panic!("missing builtin {name}"));
            assert_eq!((p.lookup, p.analytics, p.write), (lookup, analytics, write));
            assert_eq!(p.lookup + p.analytics + p.write, 100);
        }
    }

    #[test]
    fn ad_hoc_patterns_parse_and_validate() {
        let p = MixPattern::parse("55/35/10").unwrap();
        assert_eq!((p.lookup, p.analytics, p.write), (55, 35, 10));

        assert!(matches!(
            MixPattern::parse("50/40/20"),
            Err(BenchError::InvalidPattern(_))
        ));
        assert!(matches!(
            MixPattern::parse("-5/95/10"),
            Err(BenchError::InvalidPattern(_))
        ));
        assert!(matches!(
            MixPattern::parse("no-such-pattern"),
            Err(BenchError::InvalidPattern(_))
        ));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let result = WorkloadGenerator::new(
            Catalog::standard(),
            &MixPattern::named("lookup-95").unwrap(),
            DatasetSelector::synthetic(),
            0,
            1,
        );
        assert!(matches!(result, Err(BenchError::InvalidPattern(_))));
    }

    #[test]
    fn sequence_has_exact_budget_length() {
        let plans: Vec<_> = generator("lookup-95", 1_000, 3).collect();
        assert_eq!(plans.len(), 1_000);
        assert_eq!(plans.last().unwrap().ordinal, 999);
    }

    #[test]
    fn same_seed_yields_identical_sequences() {
        let a: Vec<_> = generator("balanced-50", 500, 42).collect();
        let b: Vec<_> = generator("balanced-50", 500, 42).collect();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.kind.id, y.kind.id);
            assert_eq!(x.value, y.value);
            assert_eq!(x.body, y.body);
        }

        let c: Vec<_> = generator("balanced-50", 500, 43).collect();
        assert!(a.iter().zip(&c).any(|(x, y)| x.value != y.value || x.kind.id != y.kind.id));
    }

    #[test]
    fn drawn_category_shares_track_the_pattern() {
        // balanced-50 over 20k requests should land within one percent of
        // the declared 50/40/10 split.
        let budget = 20_000u64;
        let mut tally: HashMap<&str, u64> = HashMap::new();
        for plan in generator("balanced-50", budget, 7) {
            *tally.entry(plan.kind.category.top().as_str()).or_default() += 1;
        }
        let share = |name: &str| tally.get(name).copied().unwrap_or(0) as f64 / budget as f64;
        assert!((share("lookup") - 0.50).abs() < 0.01, "lookup {}", share("lookup"));
        assert!((share("analytics") - 0.40).abs() < 0.01, "analytics {}", share("analytics"));
        assert!((share("write") - 0.10).abs() < 0.01, "write {}", share("write"));
    }

    #[test]
    fn write_plans_carry_bodies_and_reads_carry_values() {
        for plan in generator("write-50", 2_000, 11) {
            match plan.kind.slot {
                ParamSlot::WritePayload => assert!(plan.body.is_some()),
                _ => {
                    assert!(plan.body.is_none());
                    assert!(!plan.value.is_empty());
                }
            }
        }
    }

    #[test]
    fn dominant_category_follows_largest_weight() {
        assert_eq!(MixPattern::named("lookup-95").unwrap().dominant(), TopCategory::Lookup);
        assert_eq!(
            MixPattern::named("analytics-20").unwrap().dominant(),
            TopCategory::Analytics
        );
        assert_eq!(MixPattern::named("write-50").unwrap().dominant(), TopCategory::Write);
    }
}
