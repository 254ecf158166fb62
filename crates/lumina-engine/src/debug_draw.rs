//! Debug line batching and the render-side sink.
//!
//! Systems enqueue debug primitives during the frame; each primitive is
//! flattened into [`DebugLine`]s. [`World::render`](crate::world::World::render)
//! hands the live lines, together with every transform flagged as dirty, to a
//! [`RenderSink`]. No GPU is involved here, so the whole path is testable
//! headless.

use glam::{Quat, Vec3};
use lumina_ecs::entity::Entity;

use crate::components::Transform;

/// Segments per circle when drawing spheres.
const SPHERE_SEGMENTS: usize = 16;

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// Linear RGBA, each channel `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);
    pub const YELLOW: Color = Color::rgb(1.0, 1.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Unpack `0xRRGGBBAA`.
    pub fn from_rgba_u32(rgba: u32) -> Self {
        let channel = |shift: u32| ((rgba >> shift) & 0xFF) as f32 / 255.0;
        Self {
            r: channel(24),
            g: channel(16),
            b: channel(8),
            a: channel(0),
        }
    }

    /// Pack into `0xRRGGBBAA`.
    pub fn to_rgba_u32(self) -> u32 {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        (channel(self.r) << 24) | (channel(self.g) << 16) | (channel(self.b) << 8) | channel(self.a)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

// ---------------------------------------------------------------------------
// DebugLine / LineBatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    pub start: Vec3,
    pub end: Vec3,
    pub color: Color,
    /// Seconds left before the line is dropped.
    pub remaining: f32,
}

/// Frame-local queue of debug lines.
///
/// A line is rendered at least once. [`age`](Self::age) runs at the start of
/// every frame and drops lines whose duration has run out.
#[derive(Debug, Clone, Default)]
pub struct LineBatcher {
    lines: Vec<DebugLine>,
}

impl LineBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw_line(&mut self, start: Vec3, end: Vec3, color: Color, duration: f32) {
        self.lines.push(DebugLine {
            start,
            end,
            color,
            remaining: duration.max(0.0),
        });
    }

    /// Oriented box: 12 edges.
    pub fn draw_box(&mut self, center: Vec3, half_extent: Vec3, rotation: Quat, color: Color, duration: f32) {
        let corner = |x: f32, y: f32, z: f32| center + rotation * (half_extent * Vec3::new(x, y, z));
        let corners = [
            corner(-1.0, -1.0, -1.0),
            corner(1.0, -1.0, -1.0),
            corner(1.0, 1.0, -1.0),
            corner(-1.0, 1.0, -1.0),
            corner(-1.0, -1.0, 1.0),
            corner(1.0, -1.0, 1.0),
            corner(1.0, 1.0, 1.0),
            corner(-1.0, 1.0, 1.0),
        ];
        for i in 0..4 {
            let next = (i + 1) % 4;
            self.draw_line(corners[i], corners[next], color, duration);
            self.draw_line(corners[i + 4], corners[next + 4], color, duration);
            self.draw_line(corners[i], corners[i + 4], color, duration);
        }
    }

    /// Three great circles, one per axis plane.
    pub fn draw_sphere(&mut self, center: Vec3, radius: f32, color: Color, duration: f32) {
        let step = std::f32::consts::TAU / SPHERE_SEGMENTS as f32;
        let planes = [(Vec3::X, Vec3::Y), (Vec3::Y, Vec3::Z), (Vec3::Z, Vec3::X)];
        for (u, v) in planes {
            let point = |i: usize| {
                let angle = step * i as f32;
                center + (u * angle.cos() + v * angle.sin()) * radius
            };
            for i in 0..SPHERE_SEGMENTS {
                self.draw_line(point(i), point(i + 1), color, duration);
            }
        }
    }

    /// Shaft from `start` along `direction * length` plus a two-line head.
    pub fn draw_arrow(&mut self, start: Vec3, direction: Vec3, length: f32, color: Color, duration: f32) {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return;
        }
        let end = start + direction * length;
        self.draw_line(start, end, color, duration);

        let side = direction.any_orthonormal_vector();
        let head = length * 0.2;
        let back = end - direction * head;
        self.draw_line(end, back + side * head * 0.5, color, duration);
        self.draw_line(end, back - side * head * 0.5, color, duration);
    }

    /// Subtract `dt` from every line and drop the expired ones.
    pub fn age(&mut self, dt: f32) {
        for line in &mut self.lines {
            line.remaining -= dt;
        }
        self.lines.retain(|line| line.remaining >= 0.0);
    }

    pub fn lines(&self) -> &[DebugLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

// ---------------------------------------------------------------------------
// RenderSink
// ---------------------------------------------------------------------------

/// Receiver of per-frame render data. Fire-and-forget.
pub trait RenderSink {
    fn transform_updated(&mut self, entity: Entity, transform: &Transform);

    fn debug_line(&mut self, line: &DebugLine);
}

/// A sink that records everything, for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub transforms: Vec<(Entity, Transform)>,
    pub lines: Vec<DebugLine>,
}

impl RenderSink for RecordingSink {
    fn transform_updated(&mut self, entity: Entity, transform: &Transform) {
        self.transforms.push((entity, *transform));
    }

    fn debug_line(&mut self, line: &DebugLine) {
        self.lines.push(*line);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
