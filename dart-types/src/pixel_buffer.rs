use machine_vision_formats::{
    ImageBuffer, ImageBufferMutRef, ImageBufferRef, ImageData, ImageMutData, ImageStride, Stride,
};

/// Owned strided image data with a statically typed pixel format.
#[derive(Clone, Debug)]
pub struct PixelBuffer<F> {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// number of bytes in an image row
    pub stride: u32,
    /// raw image data
    pub image_data: Vec<u8>,
    /// pixel format
    pub pixel_format: std::marker::PhantomData<F>,
}

fn _test_pixel_buffer_is_send<F: Send>() {
    fn implements<T: Send>() {}
    implements::<PixelBuffer<F>>();
}

fn _test_pixel_buffer_is_image_stride<F>() {
    fn implements<T: ImageStride<F>, F>() {}
    implements::<PixelBuffer<F>, F>();
}

impl<F> PixelBuffer<F>
where
    F: machine_vision_formats::PixelFormat,
{
    /// Allocate a packed buffer with every byte set to `value`.
    pub fn new_filled(width: u32, height: u32, value: u8) -> Self {
        let fmt = machine_vision_formats::pixel_format::pixfmt::<F>().unwrap();
        let stride = fmt.bits_per_pixel() as u32 * width / 8;
        Self {
            width,
            height,
            stride,
            image_data: vec![value; stride as usize * height as usize],
            pixel_format: std::marker::PhantomData,
        }
    }

    /// Wrap packed pixel data. Panics if `data` is shorter than one packed
    /// image.
    pub fn from_packed(width: u32, height: u32, data: Vec<u8>) -> Self {
        let fmt = machine_vision_formats::pixel_format::pixfmt::<F>().unwrap();
        let stride = fmt.bits_per_pixel() as u32 * width / 8;
        assert!(data.len() >= stride as usize * height as usize);
        Self {
            width,
            height,
            stride,
            image_data: data,
            pixel_format: std::marker::PhantomData,
        }
    }

    pub fn copy_from(frame: &dyn ImageStride<F>) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            stride: frame.stride() as u32,
            image_data: frame.image_data().to_vec(),
            pixel_format: std::marker::PhantomData,
        }
    }

    /// Copy out a rectangular region. Panics if the region exceeds the
    /// image bounds.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Self {
        assert!(x + w <= self.width && y + h <= self.height);
        let fmt = machine_vision_formats::pixel_format::pixfmt::<F>().unwrap();
        let bytes_per_pixel = fmt.bits_per_pixel() as usize / 8;
        let out_stride = bytes_per_pixel * w as usize;
        let mut out = Vec::with_capacity(out_stride * h as usize);
        for row in y..y + h {
            let start = row as usize * self.stride as usize + x as usize * bytes_per_pixel;
            out.extend_from_slice(&self.image_data[start..start + out_stride]);
        }
        Self {
            width: w,
            height: h,
            stride: out_stride as u32,
            image_data: out,
            pixel_format: std::marker::PhantomData,
        }
    }
}

impl<F> PartialEq for PixelBuffer<F>
where
    F: machine_vision_formats::PixelFormat,
{
    fn eq(&self, other: &PixelBuffer<F>) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        // Strides may differ; compare only the valid bytes of each row.
        let fmt = machine_vision_formats::pixel_format::pixfmt::<F>().unwrap();
        let valid = fmt.bits_per_pixel() as usize * self.width as usize / 8;
        let a_rows = self.image_data.chunks_exact(self.stride as usize);
        let b_rows = other.image_data.chunks_exact(other.stride as usize);
        a_rows
            .zip(b_rows)
            .take(self.height as usize)
            .all(|(a, b)| a[..valid] == b[..valid])
    }
}

impl<F> ImageData<F> for PixelBuffer<F> {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn buffer_ref(&self) -> ImageBufferRef<'_, F> {
        ImageBufferRef::new(&self.image_data)
    }
    fn buffer(self) -> ImageBuffer<F> {
        ImageBuffer::new(self.image_data)
    }
}

impl<F> ImageMutData<F> for PixelBuffer<F> {
    fn buffer_mut_ref(&mut self) -> ImageBufferMutRef<'_, F> {
        ImageBufferMutRef::new(&mut self.image_data)
    }
}

impl<F> Stride for PixelBuffer<F> {
    fn stride(&self) -> usize {
        self.stride as usize
    }
}

impl<F> From<PixelBuffer<F>> for Vec<u8> {
    fn from(orig: PixelBuffer<F>) -> Vec<u8> {
        orig.image_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine_vision_formats::pixel_format::Mono8;

    #[test]
    fn crop_extracts_region() {
        let mut buf = PixelBuffer::<Mono8>::new_filled(8, 6, 0);
        // mark pixel (3, 2)
        buf.image_data[2 * 8 + 3] = 200;
        let crop = buf.crop(2, 1, 4, 3);
        assert_eq!(crop.width, 4);
        assert_eq!(crop.height, 3);
        assert_eq!(crop.image_data[1 * 4 + 1], 200);
    }

    #[test]
    fn eq_ignores_padding() {
        let a = PixelBuffer::<Mono8>::from_packed(4, 2, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let mut b = PixelBuffer::<Mono8> {
            width: 4,
            height: 2,
            stride: 6,
            image_data: vec![1, 2, 3, 4, 99, 99, 5, 6, 7, 8, 99, 99],
            pixel_format: std::marker::PhantomData,
        };
        assert_eq!(a, b);
        b.image_data[0] = 0;
        assert_ne!(a, b);
    }
}
