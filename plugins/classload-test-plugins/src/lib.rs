//! # Classload Test Plugins
//!
//! A small plugin library built as a real shared object. It exports two
//! interfaces with two classes each through [`declare_plugin_library!`].
//!
//! The host links the same crate as an rlib to name the interface traits,
//! which keeps their type ids identical on both sides of the boundary.

#![warn(missing_docs, rust_2018_idioms)]

use classload_core::declare_plugin_library;

/// Polygon interface
pub trait Shape: Send + Sync {
    /// Number of sides
    fn sides(&self) -> u32;
}

/// Animal interface
pub trait Animal: Send + Sync {
    /// What the animal says
    fn speak(&self) -> String;
}

/// Four-sided shape
#[derive(Debug, Default)]
pub struct Square;

impl Shape for Square {
    fn sides(&self) -> u32 {
        4
    }
}

/// Three-sided shape
#[derive(Debug, Default)]
pub struct Triangle;

impl Shape for Triangle {
    fn sides(&self) -> u32 {
        3
    }
}

/// Says meow
#[derive(Debug, Default)]
pub struct Cat;

impl Animal for Cat {
    fn speak(&self) -> String {
        "meow".to_string()
    }
}

/// Says woof
#[derive(Debug, Default)]
pub struct Dog;

impl Animal for Dog {
    fn speak(&self) -> String {
        "woof".to_string()
    }
}

declare_plugin_library! {
    Square => dyn Shape,
    Triangle => dyn Shape,
    Cat => dyn Animal,
    Dog => dyn Animal,
}
