pub mod admin;
pub mod auth;
pub mod callsigns;
pub mod reminder;
pub mod stats;
