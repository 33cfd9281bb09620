//! Default values for [`super::LockConfig`] fields.

// Default value functions for serde
pub(crate) fn default_check_interval_secs() -> u64 {
    60
}
pub(crate) fn default_uncertain_check_interval_secs() -> u64 {
    20
}
pub(crate) fn default_reassert_delay_ms() -> u64 {
    100
}
pub(crate) fn default_message_timeout_ms() -> u64 {
    4000
}
pub(crate) fn default_accept_poll_ms() -> u64 {
    50
}
pub(crate) fn default_true() -> bool {
    true
}
