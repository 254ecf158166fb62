//! Built-in native systems.

pub mod animation;

pub use animation::AnimationPlaybackSystem;
