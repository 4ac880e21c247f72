//! Email subsystem: context codec, template rendering, outbound sending,
//! and reply-body cleaning.

pub mod context;
pub mod reply;
pub mod sender;
pub mod templates;
