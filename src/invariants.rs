//! Runtime invariant checks with contract-test support
//!
//! Session code records every invariant it checks. A violation is logged and
//! counted; it never panics the session or analysis thread.
//!
//! ```rust,ignore
//! use crabcam_session::invariants::*;
//!
//! check_invariant!(active <= 1, Invariant::SingleBinding, "binder::rebind");
//!
//! #[test]
//! fn contract_binder() {
//!     contract_test("binder", &[Invariant::SingleBinding]);
//! }
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::errors::recover_lock;

/// Properties the session maintains at all times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invariant {
    /// At most one session binding is active
    SingleBinding,
    /// The previous binding is torn down before the next bind call
    UnbindBeforeBind,
    /// The analysis use case is bound on the primary sensor only
    AnalysisOnPrimaryOnly,
    /// Secondary sensors never receive a non-off flash
    FlashOnPrimaryOnly,
    /// At most one analysis frame awaits acknowledgement
    SingleFrameInFlight,
    /// A failed bind leaves the session unbound
    FailedBindLeavesUnbound,
}

impl Invariant {
    pub fn description(&self) -> &'static str {
        match self {
            Invariant::SingleBinding => "At most one session binding is active",
            Invariant::UnbindBeforeBind => "The previous binding is torn down before the next bind",
            Invariant::AnalysisOnPrimaryOnly => "Analysis is bound on the primary sensor only",
            Invariant::FlashOnPrimaryOnly => "Secondary sensors never receive a flash",
            Invariant::SingleFrameInFlight => "At most one analysis frame awaits acknowledgement",
            Invariant::FailedBindLeavesUnbound => "A failed bind leaves the session unbound",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvariantRecord {
    pub checked: u64,
    pub violated: u64,
}

lazy_static! {
    static ref INVARIANT_LOG: Mutex<HashMap<Invariant, InvariantRecord>> = Mutex::new(HashMap::new());
}

/// Check an invariant and record it for contract testing.
#[macro_export]
macro_rules! check_invariant {
    ($condition:expr, $invariant:expr) => {
        $crate::invariants::__check_invariant_impl($condition, $invariant, None)
    };
    ($condition:expr, $invariant:expr, $context:expr) => {
        $crate::invariants::__check_invariant_impl($condition, $invariant, Some($context))
    };
}

#[doc(hidden)]
pub fn __check_invariant_impl(condition: bool, invariant: Invariant, context: Option<&str>) -> bool {
    let mut log = recover_lock(&INVARIANT_LOG);
    let record = log.entry(invariant).or_default();
    record.checked += 1;
    if !condition {
        record.violated += 1;
        log::error!(
            "INVARIANT VIOLATION [{}]: {}",
            context.unwrap_or("unknown"),
            invariant.description()
        );
    }
    condition
}

pub fn invariant_record(invariant: Invariant) -> InvariantRecord {
    recover_lock(&INVARIANT_LOG)
        .get(&invariant)
        .copied()
        .unwrap_or_default()
}

/// Verify that each invariant was checked at least once and never violated.
///
/// # Panics
/// Panics listing every invariant that was skipped or broken.
pub fn contract_test(test_name: &str, required: &[Invariant]) {
    let log = recover_lock(&INVARIANT_LOG).clone();
    let problems = contract_problems(&log, required);
    if !problems.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]:\n  - {}",
            test_name,
            problems.join("\n  - ")
        );
    }
}

fn contract_problems(log: &HashMap<Invariant, InvariantRecord>, required: &[Invariant]) -> Vec<String> {
    let mut problems = Vec::new();
    for invariant in required {
        match log.get(invariant) {
            None => problems.push(format!("never checked: {}", invariant.description())),
            Some(record) if record.violated > 0 => problems.push(format!(
                "violated {} of {} times: {}",
                record.violated,
                record.checked,
                invariant.description()
            )),
            Some(_) => {}
        }
    }
    problems
}
