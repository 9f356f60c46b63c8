pub mod ancestors;
pub mod dedup;
pub mod eligibility;
pub mod history;
pub mod ledger;
pub mod scanner;
pub mod scoreboard;
pub mod templates;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;


pub use ancestors::{AncestorResolver, Parent};
pub use dedup::{compare_fullnames, CycleTracker, DedupWindow};
pub use eligibility::{
    AwardDecision, DenialReason, EligibilityEngine, EligibilityRules, ResponseMessage, SkipReason,
    Verdict,
};
pub use history::{record_history, HistoryEntry, TRACKER_PAGE};
pub use ledger::{AwardLedger, AwardReceipt};
pub use scanner::{contains_token, unescape_entities};
pub use scoreboard::{refresh_sidebar, Scoreboard, ScoreboardEntry, SIDEBAR_PAGE};
pub use templates::MessageTemplates;
