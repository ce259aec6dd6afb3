use serde::{Deserialize, Serialize};
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// X-y-width-height format, contains coordinates of the center of bbox and width-height
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Xywh;
impl BBoxFormat for Xywh {}

/// X-y-scale-ratio format, contains coordinates of the center of bbox,
/// its area and its width/height aspect ratio
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Xysr;
impl BBoxFormat for Xysr {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BBox<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq>(
    [f32; 4],
    PhantomData<F>,
);

impl<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq> From<BBox<F>> for [f32; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.0
    }
}

impl<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.0
    }

    // Use carefully when you REALLY sure that slice have needed format
    #[inline(always)]
    pub fn assigned(slice: &[f32; 4]) -> Self {
        BBox(*slice, Default::default())
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BBox([x1, y1, x2, y2], Default::default())
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2] - self.0[0]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3] - self.0[1]
    }

    #[inline(always)]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.0[0] + self.0[2]) / 2.0,
            (self.0[1] + self.0[3]) / 2.0,
        )
    }

    #[inline(always)]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    #[inline]
    pub fn as_xywh(&self) -> BBox<Xywh> {
        self.into()
    }

    #[inline]
    pub fn as_xysr(&self) -> BBox<Xysr> {
        self.into()
    }

    /// A box with non-positive extent or a non-finite coordinate carries no
    /// spatial information and is rejected by every matching path.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        !self.is_finite() || self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn iou(&self, other: &BBox<Ltrb>) -> f32 {
        if self.is_degenerate() || other.is_degenerate() {
            return 0.0;
        }

        let i_left = self.left().max(other.left());
        let i_top = self.top().max(other.top());
        let i_right = self.right().min(other.right());
        let i_bottom = self.bottom().min(other.bottom());

        let i_area = (i_right - i_left).max(0.0) * (i_bottom - i_top).max(0.0);
        let union = self.area() + other.area() - i_area;

        if union <= 0.0 {
            return 0.0;
        }

        i_area / union
    }

    /// Clamp the box into `(width, height)` pixel bounds.
    pub fn clamp_to(&self, dims: (u32, u32)) -> BBox<Ltrb> {
        let (fw, fh) = (dims.0 as f32, dims.1 as f32);

        BBox::ltrb(
            self.left().clamp(0.0, fw),
            self.top().clamp(0.0, fh),
            self.right().clamp(0.0, fw),
            self.bottom().clamp(0.0, fh),
        )
    }

    /// Project pixel coordinates into the [0, 1] relative frame space.
    pub fn normalized(&self, dims: (u32, u32)) -> BBox<Ltrb> {
        let fw = (dims.0 as f32).max(1.0);
        let fh = (dims.1 as f32).max(1.0);

        BBox::ltrb(
            self.left() / fw,
            self.top() / fh,
            self.right() / fw,
            self.bottom() / fh,
        )
    }
}

impl BBox<Xywh> {
    #[inline]
    pub fn xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        BBox([x, y, w, h], Default::default())
    }

    #[inline]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }
}

impl BBox<Xysr> {
    #[inline]
    pub fn xysr(x: f32, y: f32, s: f32, r: f32) -> Self {
        BBox([x, y, s, r], Default::default())
    }

    #[inline]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn area(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn aspect_ratio(&self) -> f32 {
        self.0[3]
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Xywh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        Self(
            [
                (v.0[0] + v.0[2]) / 2.0,
                (v.0[1] + v.0[3]) / 2.0,
                v.0[2] - v.0[0],
                v.0[3] - v.0[1],
            ],
            Default::default(),
        )
    }
}

impl<'a> From<&'a BBox<Xywh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xywh>) -> Self {
        Self(
            [
                v.0[0] - v.0[2] / 2.0,
                v.0[1] - v.0[3] / 2.0,
                v.0[0] + v.0[2] / 2.0,
                v.0[1] + v.0[3] / 2.0,
            ],
            Default::default(),
        )
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Xysr> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        let w = v.0[2] - v.0[0];
        let h = v.0[3] - v.0[1];

        Self(
            [
                v.0[0] + w / 2.0,
                v.0[1] + h / 2.0,
                w * h,
                if h != 0.0 { w / h } else { 0.0 },
            ],
            Default::default(),
        )
    }
}

impl<'a> From<&'a BBox<Xysr>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xysr>) -> Self {
        let w = (v.0[2] * v.0[3]).max(0.0).sqrt();
        let h = if w != 0.0 { v.0[2] / w } else { 0.0 };

        Self(
            [
                v.0[0] - w / 2.0,
                v.0[1] - h / 2.0,
                v.0[0] + w / 2.0,
                v.0[1] + h / 2.0,
            ],
            Default::default(),
        )
    }
}
