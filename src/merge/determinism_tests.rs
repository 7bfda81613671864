//! Property tests for the merge pass.
//!
//! Registries and finding batches are drawn from small identity pools so
//! collisions, corrections and re-adds happen often. For every scenario:
//!
//! - the same inputs produce the same decisions, registry and report;
//! - a second identical pass adds nothing and changes nothing;
//! - a merge never lowers any category or total count, and never drops an
//!   identity, even when findings ask for `replaceExisting`.

#![allow(clippy::all, clippy::pedantic, clippy::nursery)]

use proptest::prelude::*;

use super::{check_non_regression, merge, plan};
use crate::classify::classify;
use crate::config::ValidationConfig;
use crate::model::finding::Finding;
use crate::model::registry::{CategoryEntry, Registry};
use crate::model::types::Category;
use crate::rules::RuleSet;
use crate::validate::Validator;

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

const CATEGORIES: &[&str] = &[
    "climate_sensor",
    "plug_smart",
    "switch_1gang",
    "button_wireless_4",
    "radiator_valve",
    "motion_sensor",
];

const MANUFACTURERS: &[&str] = &[
    "_TZE200_aaaaaaaa",
    "_TZE200_bbbbbbbb",
    "_TZE204_qyr2m29i",
    "_TZ3000_wkai4ga5",
    "_TZ3000_mcxw5ehu",
    "_TZ3000_cccccccc",
    "_TZ3000_dddddddd",
    "_tze200_abc",
    "HOBEIAN",
];

const MODELS: &[&str] = &[
    "TS0601", "TS0201", "TS011F", "TS0001", "TS0044", "TS0202", "ZG-204ZM",
];

fn rules() -> RuleSet {
    RuleSet::builtin().unwrap()
}

fn arb_registry() -> impl Strategy<Value = Registry> {
    prop::collection::vec(
        (
            prop::sample::select(CATEGORIES),
            prop::sample::subsequence(MANUFACTURERS, 0..3),
            prop::sample::subsequence(MODELS, 0..2),
        ),
        1..5,
    )
    .prop_map(|entries| {
        let mut registry = Registry::new();
        for (category, mfrs, models) in entries {
            let entry = CategoryEntry::from_strings(mfrs, models);
            let slot = registry.entry_mut(&Category::new(category).unwrap());
            slot.manufacturers.extend(entry.manufacturers.iter().cloned());
            slot.models.extend(entry.models.iter().cloned());
        }
        registry
    })
}

fn arb_finding(replace: bool) -> impl Strategy<Value = Finding> {
    (
        prop::option::weighted(0.9, prop::sample::select(MANUFACTURERS)),
        prop::option::weighted(0.9, prop::sample::select(MODELS)),
        any::<bool>(),
    )
        .prop_map(move |(mfr, model, flag)| {
            let mut f = Finding::with_pair(mfr.unwrap_or(""), model.unwrap_or(""));
            f.replace_existing = replace && flag;
            f
        })
}

fn arb_batch(replace: bool) -> impl Strategy<Value = Vec<Finding>> {
    prop::collection::vec(arb_finding(replace), 0..12)
}

/// One full pass; `None` if the invariant aborted it.
fn pass(registry: &Registry, findings: &[Finding]) -> Option<(Registry, String)> {
    let rules = rules();
    let validator = Validator::new(&ValidationConfig::default(), &rules).unwrap();
    let validations = validator.validate_batch(findings);
    let decisions = plan(findings, &validations, registry, &rules);
    merge(registry, decisions).ok().map(|outcome| {
        let report = serde_json::to_string(&outcome.report).unwrap();
        (outcome.proposed, report)
    })
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn pass_is_deterministic(registry in arb_registry(), findings in arb_batch(true)) {
        let first = pass(&registry, &findings);
        let second = pass(&registry, &findings);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn classify_is_deterministic(registry in arb_registry(), findings in arb_batch(false)) {
        let rules = rules();
        for f in &findings {
            prop_assert_eq!(classify(f, &registry, &rules), classify(f, &registry, &rules));
        }
    }

    #[test]
    fn second_pass_is_a_noop(registry in arb_registry(), findings in arb_batch(false)) {
        let (after_first, _) = pass(&registry, &findings).expect("additive batch never aborts");
        let (after_second, report) = pass(&after_first, &findings).expect("additive batch never aborts");
        prop_assert_eq!(&after_first, &after_second);
        let report: serde_json::Value = serde_json::from_str(&report).unwrap();
        prop_assert_eq!(&report["totals"]["added"], &serde_json::json!(0));
        prop_assert_eq!(&report["delta"], &serde_json::json!(0));
    }

    #[test]
    fn merge_never_drops_an_identity(registry in arb_registry(), findings in arb_batch(true)) {
        let (after, _) = pass(&registry, &findings).expect("union never aborts");
        prop_assert!(check_non_regression(&registry, &after).is_ok());
        for (category, entry) in registry.iter() {
            let kept = after.get(category).expect("category kept");
            let b = entry.counts();
            let a = kept.counts();
            prop_assert!(a.manufacturers >= b.manufacturers, "{}", category);
            prop_assert!(a.models >= b.models, "{}", category);
            for id in entry.manufacturers.iter() {
                prop_assert!(kept.manufacturers.contains(id), "{} lost {}", category, id);
            }
            for id in entry.models.iter() {
                prop_assert!(kept.models.contains(id), "{} lost {}", category, id);
            }
        }
    }

    #[test]
    fn merges_only_touch_registry_categories(registry in arb_registry(), findings in arb_batch(false)) {
        let (after, _) = pass(&registry, &findings).expect("additive batch never aborts");
        let before: Vec<_> = registry.categories().collect();
        let after_categories: Vec<_> = after.categories().collect();
        prop_assert_eq!(before, after_categories);
    }
}
