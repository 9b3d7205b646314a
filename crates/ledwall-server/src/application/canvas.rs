//! The virtual canvas: an ordered set of elements composited into one
//! pixel buffer.
//!
//! Layering is by id only.  Lower ids are painted first, so the highest id
//! ends up on top regardless of the order elements were added in.  Elements
//! that hang over any edge are clipped, never wrapped.

use std::collections::BTreeMap;

use ledwall_core::PixelBuffer;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::element::Element;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanvasError {
    #[error("element id {0} already exists on the canvas")]
    DuplicateId(u32),
}

/// Builds the 256-entry gamma table `round((i / 255)^gamma * 255)`.
pub fn gamma_lut(gamma: f64) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let v = (i as f64 / 255.0).powf(gamma) * 255.0;
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

pub struct Canvas {
    buffer: PixelBuffer,
    /// Keyed by id, so iteration order is the paint order.
    elements: BTreeMap<u32, Element>,
    gamma: Option<[u8; 256]>,
}

impl Canvas {
    /// Creates a black canvas with no elements and no gamma correction.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffer: PixelBuffer::new(width, height),
            elements: BTreeMap::new(),
            gamma: None,
        }
    }

    /// Enables gamma correction of element pixels during composition.
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = Some(gamma_lut(gamma));
        self
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// The most recently composited frame.
    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Adds an element.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::DuplicateId`] and leaves the canvas unchanged if
    /// an element with the same id is already present.
    pub fn add(&mut self, element: Element) -> Result<(), CanvasError> {
        let id = element.id();
        if self.elements.contains_key(&id) {
            warn!("rejecting element {id}: id already in use");
            return Err(CanvasError::DuplicateId(id));
        }
        debug!(
            "added {} element {id} at {:?}",
            element.source().kind(),
            element.position()
        );
        self.elements.insert(id, element);
        Ok(())
    }

    pub fn remove(&mut self, id: u32) -> Option<Element> {
        self.elements.remove(&id)
    }

    pub fn element(&self, id: u32) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Ids in paint order.
    pub fn ids(&self) -> Vec<u32> {
        self.elements.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Moves an element; returns `false` if no element has that id.
    pub fn move_element(&mut self, id: u32, x: i32, y: i32) -> bool {
        match self.elements.get_mut(&id) {
            Some(e) => {
                e.set_position(x, y);
                true
            }
            None => false,
        }
    }

    /// Rewinds an element to its first frame; returns `false` if absent.
    pub fn reset(&mut self, id: u32) -> bool {
        match self.elements.get_mut(&id) {
            Some(e) => {
                e.reset();
                true
            }
            None => false,
        }
    }

    /// Advances one element by a frame; returns `false` if absent.
    pub fn advance(&mut self, id: u32) -> bool {
        match self.elements.get_mut(&id) {
            Some(e) => {
                e.advance();
                true
            }
            None => false,
        }
    }

    /// Advances every element with a positive frame rate.
    pub fn advance_all(&mut self) {
        for e in self.elements.values_mut().filter(|e| e.is_animated()) {
            e.advance();
        }
    }

    /// Clears the buffer and paints every element in ascending id order.
    pub fn recomposite(&mut self) {
        self.buffer.clear();
        let lut = self.gamma.as_ref();
        for e in self.elements.values() {
            let (x, y) = e.position();
            self.buffer.blit(e.current_frame(), x, y, lut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::element::test_support::solid;

    fn square(v: u8, size: u32) -> PixelBuffer {
        PixelBuffer::filled(size, size, [v, v, v])
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut canvas = Canvas::new(4, 4);
        canvas.add(Element::image(1, 0, 0, square(10, 2))).unwrap();

        let result = canvas.add(Element::image(1, 2, 2, square(20, 2)));

        assert_eq!(result, Err(CanvasError::DuplicateId(1)));
        assert_eq!(canvas.len(), 1);
        assert_eq!(canvas.element(1).unwrap().position(), (0, 0));
    }

    #[test]
    fn test_recomposite_paints_in_ascending_id_order() {
        // Arrange: insertion order 3, 1, 2 over the same pixel.
        let mut canvas = Canvas::new(2, 2);
        canvas.add(Element::image(3, 0, 0, square(30, 2))).unwrap();
        canvas.add(Element::image(1, 0, 0, square(10, 2))).unwrap();
        canvas.add(Element::image(2, 0, 0, square(20, 2))).unwrap();

        // Act
        canvas.recomposite();

        // Assert
        assert_eq!(canvas.ids(), vec![1, 2, 3]);
        assert_eq!(canvas.buffer().pixel(0, 0), Some([30, 30, 30]));
    }

    #[test]
    fn test_recomposite_partial_overlap_shows_each_layer() {
        let mut canvas = Canvas::new(3, 1);
        canvas.add(Element::image(2, 1, 0, square(20, 1))).unwrap();
        canvas.add(Element::image(1, 0, 0, PixelBuffer::filled(3, 1, [10, 10, 10]))).unwrap();
        canvas.recomposite();

        let row: Vec<u8> = canvas.buffer().data().chunks(3).map(|p| p[0]).collect();
        assert_eq!(row, vec![10, 20, 10]);
    }

    #[test]
    fn test_recomposite_clears_previous_frame() {
        let mut canvas = Canvas::new(4, 1);
        canvas.add(Element::image(1, 0, 0, square(50, 1))).unwrap();
        canvas.recomposite();
        assert!(canvas.move_element(1, 3, 0));
        canvas.recomposite();

        assert_eq!(canvas.buffer().pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(canvas.buffer().pixel(3, 0), Some([50, 50, 50]));
    }

    #[test]
    fn test_recomposite_clips_overflowing_element() {
        let mut canvas = Canvas::new(2, 2);
        canvas.add(Element::image(1, -1, 1, square(7, 3))).unwrap();
        canvas.recomposite();

        assert_eq!(canvas.buffer().pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(canvas.buffer().pixel(0, 1), Some([7, 7, 7]));
        assert_eq!(canvas.buffer().pixel(1, 1), Some([7, 7, 7]));
    }

    #[test]
    fn test_move_and_reset_unknown_id_return_false() {
        let mut canvas = Canvas::new(2, 2);
        assert!(!canvas.move_element(9, 0, 0));
        assert!(!canvas.reset(9));
        assert!(!canvas.advance(9));
    }

    #[test]
    fn test_remove_drops_element_from_composition() {
        let mut canvas = Canvas::new(1, 1);
        canvas.add(Element::image(1, 0, 0, square(5, 1))).unwrap();
        assert!(canvas.remove(1).is_some());
        canvas.recomposite();
        assert_eq!(canvas.buffer().pixel(0, 0), Some([0, 0, 0]));
        assert!(canvas.remove(1).is_none());
    }

    #[test]
    fn test_advance_all_only_touches_animated_elements() {
        let mut canvas = Canvas::new(1, 1);
        canvas
            .add(Element::carousel(1, 0, 0, 5.0, vec![solid(1), solid(2)]).unwrap())
            .unwrap();
        canvas
            .add(Element::carousel(2, 0, 0, 0.0, vec![solid(3), solid(4)]).unwrap())
            .unwrap();

        canvas.advance_all();

        assert_eq!(canvas.element(1).unwrap().current_frame().data()[0], 2);
        assert_eq!(canvas.element(2).unwrap().current_frame().data()[0], 3);
    }

    #[test]
    fn test_gamma_lut_endpoints_and_midpoint() {
        let lut = gamma_lut(2.2);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[255], 255);
        // (128/255)^2.2 * 255 ≈ 55.97
        assert_eq!(lut[128], 56);
        assert_eq!(gamma_lut(1.0)[77], 77);
    }

    #[test]
    fn test_recomposite_applies_gamma() {
        let mut canvas = Canvas::new(1, 1).with_gamma(2.2);
        canvas.add(Element::image(1, 0, 0, square(128, 1))).unwrap();
        canvas.recomposite();
        assert_eq!(canvas.buffer().pixel(0, 0), Some([56, 56, 56]));
    }
}
