//! # wamux-whatsapp
//!
//! Multi-tenant client and inbound-event router for the WhatsApp Business
//! Cloud API.

pub mod whatsapp;

pub use whatsapp::*;
