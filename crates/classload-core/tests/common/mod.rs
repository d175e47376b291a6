//! Plugin fixtures shared by the integration tests

#![allow(dead_code)]

use classload_core::{InProcessBackend, Registrar, Registry};
use std::sync::Arc;

pub const SHAPES: &str = "libshapes.so";
pub const ANIMALS: &str = "libanimals.so";
pub const MORE_ANIMALS: &str = "libmoreanimals.so";

pub trait Shape: Send + Sync {
    fn sides(&self) -> u32;
}

pub trait Animal: Send + Sync {
    fn speak(&self) -> String;
}

#[derive(Default)]
pub struct Square;

impl Shape for Square {
    fn sides(&self) -> u32 {
        4
    }
}

#[derive(Default)]
pub struct Triangle;

impl Shape for Triangle {
    fn sides(&self) -> u32 {
        3
    }
}

#[derive(Default)]
pub struct Cat;

impl Animal for Cat {
    fn speak(&self) -> String {
        "meow".to_string()
    }
}

#[derive(Default)]
pub struct Dog;

impl Animal for Dog {
    fn speak(&self) -> String {
        "woof".to_string()
    }
}

#[derive(Default)]
pub struct Cow;

impl Animal for Cow {
    fn speak(&self) -> String {
        "moo".to_string()
    }
}

pub fn register_shapes(registrar: &mut Registrar<'_>) {
    classload_core::register_class!(registrar, Square => dyn Shape);
    classload_core::register_class!(registrar, Triangle => dyn Shape);
}

pub fn register_animals(registrar: &mut Registrar<'_>) {
    classload_core::register_class!(registrar, Cat => dyn Animal);
    classload_core::register_class!(registrar, Dog => dyn Animal);
}

/// Registers `Cat` again, clashing with [`register_animals`], and `Cow`
pub fn register_more_animals(registrar: &mut Registrar<'_>) {
    classload_core::register_class!(registrar, Cat => dyn Animal);
    classload_core::register_class!(registrar, Cow => dyn Animal);
}

/// A private registry over the three fixture libraries
pub fn setup() -> (InProcessBackend, Arc<Registry>) {
    let backend = InProcessBackend::new()
        .with_library(SHAPES, register_shapes)
        .with_library(ANIMALS, register_animals)
        .with_library(MORE_ANIMALS, register_more_animals);
    let registry = Arc::new(Registry::new(Arc::new(backend.clone())));
    (backend, registry)
}
