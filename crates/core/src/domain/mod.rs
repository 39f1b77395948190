pub mod agent;
pub mod contact;
pub mod conversation;
pub mod knowledge;
pub mod tool;
pub mod usage;
