//! Gantry Core
//!
//! Core types and abstractions for the Gantry runner controller.
//!
//! This crate contains:
//! - Domain types: the controller's two views of its worker fleet
//!   (registry side and runtime side) and the scaling decision model
//! - Ports: traits implemented by the registry and runtime adapters
//! - DTOs: payloads served by the controller's HTTP surface

pub mod domain;
pub mod dto;
pub mod ports;
