// Error codes implementation
// Stable codes surfaced to callers of the billing engine

pub mod validation {
    pub const INVALID_INPUT: &str = "VALIDATION_1001";
}

pub mod conflict {
    pub const STATE_CONFLICT: &str = "CONFLICT_2001";
}

pub mod storage {
    pub const CAPABILITY_UNAVAILABLE: &str = "STORE_4001";
    pub const QUERY_FAILED: &str = "STORE_4002";
    pub const RECORD_NOT_FOUND: &str = "STORE_4003";
}

pub mod billing {
    pub use super::conflict::*;
    pub use super::storage::*;
    pub use super::validation::*;

    pub const SOURCE_LOOKUP_FAILED: &str = "BILLING_5001";
    pub const INVALID_CONFIGURATION: &str = "BILLING_5002";
}
