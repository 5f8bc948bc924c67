//! Decision provider: interactive prompts answered outside the scheduler.
//!
//! Workers raise message boxes and credential requests over the wire; the
//! control loop answers them through this trait. A GUI host bridges to its
//! dialogs; headless embedders use [`AutoDecline`].

use portage_wire::payload::{MessageBoxMsg, ANSWER_CANCEL};
use portage_wire::AuthInfo;

pub trait DecisionProvider: Send + Sync {
    /// Answer an interactive prompt. Returns one of the ANSWER_* codes.
    fn message_box(&self, request: &MessageBoxMsg) -> i32;

    /// Fill in credentials for an auth prompt, or None to cancel.
    fn request_credentials(&self, info: &AuthInfo) -> Option<AuthInfo>;

    /// Whether to accept a resume offer at `offset` for `url`.
    fn confirm_resume(&self, _url: &str, _offset: u64) -> bool {
        true
    }
}

/// Declines every prompt. The safe default for unattended use.
#[derive(Debug, Default)]
pub struct AutoDecline;

impl DecisionProvider for AutoDecline {
    fn message_box(&self, _request: &MessageBoxMsg) -> i32 {
        ANSWER_CANCEL
    }

    fn request_credentials(&self, _info: &AuthInfo) -> Option<AuthInfo> {
        None
    }
}
