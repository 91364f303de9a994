//! Gateway protocol definitions
//!
//! Op codes, frame format, payloads and close codes.

mod close_codes;
mod command;
mod frame;
mod opcodes;
mod payloads;

pub use close_codes::{describe, CloseCode, Recovery, NORMAL_CLOSE_CODE, RESUME_CLOSE_CODE};
pub use command::GatewayCommand;
pub use frame::GatewayFrame;
pub use opcodes::{OpCode, UnknownOpCode};
pub use payloads::{
    Activity, HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload,
    RequestGuildMembers, ResumePayload, Status, UpdatePresence, UpdateVoiceState,
};
