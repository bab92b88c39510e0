//! # rio-core — Trait definitions for Registered I/O
//!
//! This crate defines the native-layout records and the trait boundaries
//! of the registered-I/O socket core. Each trait models one seam:
//!
//! | Trait          | Role                                          |
//! |----------------|-----------------------------------------------|
//! | `RioExtension` | the bound extension function table            |
//! | `Waitable`     | the event a completion queue signals          |
//! | `RioSocket`    | a socket created with registered-I/O flags    |
//!
//! Implementations (Winsock, emulated) live in `rio-module`. Everything
//! above the function table is generic over `RioExtension`, so swapping
//! the provider is a type parameter change.

pub mod entry;
pub mod extension;
pub mod waitable;
pub mod error;
pub mod env;
pub mod klog;
pub mod config;
