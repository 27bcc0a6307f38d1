use crate::{
    mapping::FrameFeatures,
    scene::{self, SceneDescriptor},
    Result,
};

/// RGBA8 pixel buffer a renderer paints into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// Opaque black surface.
    pub fn new(width: u32, height: u32) -> Self {
        let mut surface = Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        };
        surface.fill([0, 0, 0]);
        surface
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut pixel = [0; 4];
        pixel.copy_from_slice(&self.pixels[offset..offset + 4]);
        Some(pixel)
    }

    pub fn fill(&mut self, color: [u8; 3]) {
        for pixel in self.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&[color[0], color[1], color[2], 255]);
        }
    }

    /// Blends `color` over the rectangle with `alpha` in `[0, 1]`; the
    /// rectangle is clipped to the surface.
    pub fn blend_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        color: [u8; 3],
        alpha: f32,
    ) {
        let alpha = alpha.clamp(0.0, 1.0);
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for row in y.min(y_end)..y_end {
            for column in x.min(x_end)..x_end {
                self.blend_pixel(column, row, color, alpha);
            }
        }
    }

    pub(crate) fn blend_pixel(&mut self, x: u32, y: u32, color: [u8; 3], alpha: f32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        for (channel, value) in self.pixels[offset..offset + 3].iter_mut().zip(color) {
            let mixed = f32::from(*channel) * (1.0 - alpha) + f32::from(value) * alpha;
            *channel = mixed.round() as u8;
        }
    }
}

/// Paints one frame from its features. Implemented by the visual layer; the
/// core only calls it once per export or display tick.
pub trait Renderer {
    fn render(&mut self, features: &FrameFeatures) -> Result<Surface>;
}

impl<F> Renderer for F
where
    F: FnMut(&FrameFeatures) -> Result<Surface>,
{
    fn render(&mut self, features: &FrameFeatures) -> Result<Surface> {
        self(features)
    }
}

/// Software renderer that paints a scene's effects, in order, onto a fresh
/// surface each frame.
#[derive(Debug, Clone)]
pub struct SceneRenderer {
    scene: SceneDescriptor,
    width: u32,
    height: u32,
}

impl SceneRenderer {
    pub fn new(scene: SceneDescriptor, width: u32, height: u32) -> Self {
        Self {
            scene,
            width,
            height,
        }
    }

    pub fn scene(&self) -> &SceneDescriptor {
        &self.scene
    }
}

impl Renderer for SceneRenderer {
    fn render(&mut self, features: &FrameFeatures) -> Result<Surface> {
        let mut surface = Surface::new(self.width, self.height);
        surface.fill(self.scene.background);
        for effect in &self.scene.effects {
            scene::paint(effect, features, &mut surface);
        }
        Ok(surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_is_clipped_to_the_surface() {
        let mut surface = Surface::new(4, 4);
        surface.blend_rect(2, 2, 10, 10, [255, 255, 255], 1.0);

        assert_eq!(surface.pixel(3, 3), Some([255, 255, 255, 255]));
        assert_eq!(surface.pixel(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(surface.pixel(4, 0), None);
    }

    #[test]
    fn half_alpha_mixes_colours() {
        let mut surface = Surface::new(1, 1);
        surface.fill([100, 100, 100]);
        surface.blend_rect(0, 0, 1, 1, [200, 0, 100], 0.5);
        assert_eq!(surface.pixel(0, 0), Some([150, 50, 100, 255]));
    }

    #[test]
    fn scene_renderer_matches_requested_size() {
        let mut renderer = SceneRenderer::new(SceneDescriptor::demo(), 64, 36);
        let surface = renderer.render(&FrameFeatures::default()).unwrap();
        assert_eq!((surface.width(), surface.height()), (64, 36));
        assert_eq!(surface.pixels().len(), 64 * 36 * 4);
    }

    #[test]
    fn closures_are_renderers() {
        let mut calls = 0;
        let mut renderer = |_: &FrameFeatures| -> Result<Surface> {
            calls += 1;
            Ok(Surface::new(2, 2))
        };
        renderer.render(&FrameFeatures::default()).unwrap();
        assert_eq!(calls, 1);
    }
}
