use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use image::{ImageBuffer, Pixel};
use num_traits::AsPrimitive;

use crate::error::{Error, Result};
use crate::utils::{Sample, SampleDepth};
use crate::Image;

/// 矩形領域 (関心領域) を表す構造体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect {
    /// 左上のX座標
    pub x: u32,
    /// 左上のY座標
    pub y: u32,
    /// 幅
    pub width: u32,
    /// 高さ
    pub height: u32,
}

impl Rect {
    /// 新しい矩形を作成する
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 矩形が `width` x `height` の領域に収まり、かつ空でないかを判定する
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = u64::from(self.x) + u64::from(self.width);
        let bottom = u64::from(self.y) + u64::from(self.height);
        self.width > 0
            && self.height > 0
            && right <= u64::from(width)
            && bottom <= u64::from(height)
    }
}

/// フレームの形状 (サイズ、チャンネル数、サンプル型)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLayout {
    /// 幅
    pub width: u32,
    /// 高さ
    pub height: u32,
    /// アルファを含むチャンネル数
    pub channels: u8,
    /// サンプル型
    pub depth: SampleDepth,
}

impl FrameLayout {
    /// ピクセル型 `P` のフレーム形状を作成する
    pub fn of<P>(width: u32, height: u32) -> Self
    where
        P: Pixel,
        P::Subpixel: Sample,
    {
        Self {
            width,
            height,
            channels: P::CHANNEL_COUNT,
            depth: P::Subpixel::DEPTH,
        }
    }

    /// アルファを除いた色チャンネル数
    pub fn color_channels(&self) -> usize {
        match self.channels {
            2 | 4 => usize::from(self.channels) - 1,
            n => usize::from(n),
        }
    }

    /// 画素数
    pub fn pixel_count(&self) -> usize {
        let width: usize = self.width.as_();
        let height: usize = self.height.as_();
        width * height
    }
}

impl fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} channels, {:?})",
            self.width, self.height, self.channels, self.depth
        )
    }
}

/// ゼロ初期化された画像を作成する
///
/// # 引数
///
/// * `width` - 幅
/// * `height` - 高さ
pub fn create<P: Pixel>(width: u32, height: u32) -> Image<P> {
    ImageBuffer::new(width, height)
}

/// 親バッファのストレージを共有する読み取り専用ビュー
///
/// `data` は領域の先頭画素から始まり、行ごとに `stride` サンプル進む。
pub struct FrameView<'a, P: Pixel> {
    data: &'a [P::Subpixel],
    width: u32,
    height: u32,
    stride: usize,
    _pixel: PhantomData<fn() -> P>,
}

impl<P: Pixel> Clone for FrameView<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Pixel> Copy for FrameView<'_, P> {}

impl<P: Pixel> fmt::Debug for FrameView<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameView")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &P::CHANNEL_COUNT)
            .field("stride", &self.stride)
            .finish()
    }
}

impl<'a, P: Pixel> FrameView<'a, P> {
    fn row_len(&self) -> usize {
        let width: usize = self.width.as_();
        width * usize::from(P::CHANNEL_COUNT)
    }

    /// 幅
    pub fn width(&self) -> u32 {
        self.width
    }

    /// 高さ
    pub fn height(&self) -> u32 {
        self.height
    }

    /// (幅, 高さ)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// アルファを含むチャンネル数
    pub fn channels(&self) -> usize {
        usize::from(P::CHANNEL_COUNT)
    }

    /// 行間隔 (サンプル単位)
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// `y` 行目のサンプル列を返す
    ///
    /// # パニック
    ///
    /// `y` が高さ以上の場合
    pub fn row(&self, y: u32) -> &'a [P::Subpixel] {
        assert!(y < self.height, "row {y} out of bounds");
        let y: usize = y.as_();
        let start = y * self.stride;
        &self.data[start..start + self.row_len()]
    }

    /// 全ての行を上から順に返す
    pub fn rows(&self) -> impl Iterator<Item = &'a [P::Subpixel]> {
        let row_len = self.row_len();
        let height: usize = self.height.as_();
        self.data
            .chunks(self.stride.max(1))
            .take(height)
            .map(move |row| &row[..row_len])
    }

    /// `(x, y)` の画素のサンプルを返す
    ///
    /// # パニック
    ///
    /// 座標が範囲外の場合
    pub fn pixel(&self, x: u32, y: u32) -> &'a [P::Subpixel] {
        assert!(x < self.width, "column {x} out of bounds");
        let channels = usize::from(P::CHANNEL_COUNT);
        let x: usize = x.as_();
        let start = x * channels;
        &self.row(y)[start..start + channels]
    }

    /// 矩形領域のビューを返す
    ///
    /// # エラー
    ///
    /// * `Error::InvalidRegion` - 矩形が範囲外、または空の場合
    pub fn roi(&self, rect: Rect) -> Result<FrameView<'a, P>> {
        if !rect.fits_within(self.width, self.height) {
            return Err(Error::InvalidRegion {
                rect,
                parent: self.dimensions(),
            });
        }
        let x: usize = rect.x.as_();
        let y: usize = rect.y.as_();
        let offset = y * self.stride + x * usize::from(P::CHANNEL_COUNT);
        Ok(FrameView {
            data: &self.data[offset..],
            width: rect.width,
            height: rect.height,
            stride: self.stride,
            _pixel: PhantomData,
        })
    }

    /// ビューの内容を連続した画像にコピーする
    pub fn to_image(&self) -> Image<P> {
        ImageBuffer::from_fn(self.width, self.height, |x, y| {
            *P::from_slice(self.pixel(x, y))
        })
    }
}

impl<P> FrameView<'_, P>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    /// フレーム形状
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::of::<P>(self.width, self.height)
    }
}

impl<'a, P, C> From<&'a ImageBuffer<P, C>> for FrameView<'a, P>
where
    P: Pixel,
    C: Deref<Target = [P::Subpixel]>,
{
    fn from(image: &'a ImageBuffer<P, C>) -> Self {
        let (width, height) = image.dimensions();
        let width_samples: usize = width.as_();
        Self {
            data: &**image,
            width,
            height,
            stride: width_samples * usize::from(P::CHANNEL_COUNT),
            _pixel: PhantomData,
        }
    }
}

impl<'a, 'b: 'a, P: Pixel> From<&'a FrameViewMut<'b, P>> for FrameView<'a, P> {
    fn from(view: &'a FrameViewMut<'b, P>) -> Self {
        view.as_view()
    }
}

/// 親バッファのストレージを共有する書き込み可能ビュー
///
/// 書き込みは親バッファから見え、領域外には及ばない。
pub struct FrameViewMut<'a, P: Pixel> {
    data: &'a mut [P::Subpixel],
    width: u32,
    height: u32,
    stride: usize,
    _pixel: PhantomData<fn() -> P>,
}

impl<P: Pixel> fmt::Debug for FrameViewMut<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameViewMut")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &P::CHANNEL_COUNT)
            .field("stride", &self.stride)
            .finish()
    }
}

impl<'a, P: Pixel> FrameViewMut<'a, P> {
    fn row_len(&self) -> usize {
        let width: usize = self.width.as_();
        width * usize::from(P::CHANNEL_COUNT)
    }

    /// 幅
    pub fn width(&self) -> u32 {
        self.width
    }

    /// 高さ
    pub fn height(&self) -> u32 {
        self.height
    }

    /// (幅, 高さ)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// アルファを含むチャンネル数
    pub fn channels(&self) -> usize {
        usize::from(P::CHANNEL_COUNT)
    }

    /// 行間隔 (サンプル単位)
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// 読み取り専用ビューとして借用する
    pub fn as_view(&self) -> FrameView<'_, P> {
        FrameView {
            data: &*self.data,
            width: self.width,
            height: self.height,
            stride: self.stride,
            _pixel: PhantomData,
        }
    }

    /// `y` 行目のサンプル列を返す
    pub fn row(&self, y: u32) -> &[P::Subpixel] {
        self.as_view().row(y)
    }

    /// `(x, y)` の画素のサンプルを返す
    pub fn pixel(&self, x: u32, y: u32) -> &[P::Subpixel] {
        self.as_view().pixel(x, y)
    }

    /// `y` 行目の書き込み可能なサンプル列を返す
    ///
    /// # パニック
    ///
    /// `y` が高さ以上の場合
    pub fn row_mut(&mut self, y: u32) -> &mut [P::Subpixel] {
        assert!(y < self.height, "row {y} out of bounds");
        let row_len = self.row_len();
        let y: usize = y.as_();
        let start = y * self.stride;
        &mut self.data[start..start + row_len]
    }

    /// 全ての行を書き込み可能な形で上から順に返す
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [P::Subpixel]> {
        let row_len = self.row_len();
        let height: usize = self.height.as_();
        self.data
            .chunks_mut(self.stride.max(1))
            .take(height)
            .map(move |row| &mut row[..row_len])
    }

    /// `(x, y)` に画素を書き込む
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: P) {
        assert!(x < self.width, "column {x} out of bounds");
        let channels = usize::from(P::CHANNEL_COUNT);
        let x: usize = x.as_();
        let start = x * channels;
        self.row_mut(y)[start..start + channels].copy_from_slice(pixel.channels());
    }

    /// 全画素を `pixel` で埋める
    pub fn fill(&mut self, pixel: P) {
        let channels = usize::from(P::CHANNEL_COUNT);
        for row in self.rows_mut() {
            for dst in row.chunks_exact_mut(channels) {
                dst.copy_from_slice(pixel.channels());
            }
        }
    }

    /// 同じサイズのビューから内容をコピーする
    ///
    /// # エラー
    ///
    /// * `Error::DimensionMismatch` - サイズが異なる場合
    pub fn copy_from(&mut self, source: &FrameView<'_, P>) -> Result<()>
    where
        P::Subpixel: Sample,
    {
        if source.dimensions() != self.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: FrameLayout::of::<P>(self.width, self.height),
                actual: source.layout(),
            });
        }
        for (dst, src) in self.rows_mut().zip(source.rows()) {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    fn reborrow(&mut self) -> FrameViewMut<'_, P> {
        FrameViewMut {
            data: &mut *self.data,
            width: self.width,
            height: self.height,
            stride: self.stride,
            _pixel: PhantomData,
        }
    }

    /// 矩形領域の書き込み可能ビューを返す
    ///
    /// # エラー
    ///
    /// * `Error::InvalidRegion` - 矩形が範囲外、または空の場合
    pub fn roi_mut(&mut self, rect: Rect) -> Result<FrameViewMut<'_, P>> {
        self.reborrow().into_roi(rect)
    }

    /// ビューを消費して矩形領域の書き込み可能ビューに変換する
    ///
    /// # エラー
    ///
    /// * `Error::InvalidRegion` - 矩形が範囲外、または空の場合
    pub fn into_roi(self, rect: Rect) -> Result<FrameViewMut<'a, P>> {
        if !rect.fits_within(self.width, self.height) {
            return Err(Error::InvalidRegion {
                rect,
                parent: self.dimensions(),
            });
        }
        let x: usize = rect.x.as_();
        let y: usize = rect.y.as_();
        let offset = y * self.stride + x * usize::from(P::CHANNEL_COUNT);
        Ok(FrameViewMut {
            data: &mut self.data[offset..],
            width: rect.width,
            height: rect.height,
            stride: self.stride,
            _pixel: PhantomData,
        })
    }

    /// ビューの内容を連続した画像にコピーする
    pub fn to_image(&self) -> Image<P> {
        self.as_view().to_image()
    }
}

impl<P> FrameViewMut<'_, P>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    /// フレーム形状
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::of::<P>(self.width, self.height)
    }
}

impl<'a, P, C> From<&'a mut ImageBuffer<P, C>> for FrameViewMut<'a, P>
where
    P: Pixel,
    C: DerefMut<Target = [P::Subpixel]>,
{
    fn from(image: &'a mut ImageBuffer<P, C>) -> Self {
        let (width, height) = image.dimensions();
        let width_samples: usize = width.as_();
        Self {
            data: &mut **image,
            width,
            height,
            stride: width_samples * usize::from(P::CHANNEL_COUNT),
            _pixel: PhantomData,
        }
    }
}

/// 画像から関心領域ビューを取り出すトレイト
pub trait RegionOfInterest<P: Pixel> {
    /// 画像全体の読み取り専用ビュー
    fn view(&self) -> FrameView<'_, P>;

    /// 画像全体の書き込み可能ビュー
    fn view_mut(&mut self) -> FrameViewMut<'_, P>;

    /// 矩形領域の読み取り専用ビュー
    ///
    /// # エラー
    ///
    /// * `Error::InvalidRegion` - 矩形が範囲外、または空の場合
    fn roi(&self, rect: Rect) -> Result<FrameView<'_, P>>;

    /// 矩形領域の書き込み可能ビュー
    ///
    /// # エラー
    ///
    /// * `Error::InvalidRegion` - 矩形が範囲外、または空の場合
    fn roi_mut(&mut self, rect: Rect) -> Result<FrameViewMut<'_, P>>;
}

impl<P: Pixel> RegionOfInterest<P> for Image<P> {
    fn view(&self) -> FrameView<'_, P> {
        FrameView::from(self)
    }

    fn view_mut(&mut self) -> FrameViewMut<'_, P> {
        FrameViewMut::from(self)
    }

    fn roi(&self, rect: Rect) -> Result<FrameView<'_, P>> {
        self.view().roi(rect)
    }

    fn roi_mut(&mut self, rect: Rect) -> Result<FrameViewMut<'_, P>> {
        self.view_mut().into_roi(rect)
    }
}
