//! End-to-end loads through the public API.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use mozimage::gif::classify_animation;
use mozimage::{
    AnimationKind, Background, Collector, DecodedImage, ImageBuffer, ImageFormat, ImgVec, LoadStatus,
    LoaderConfig, ProgressiveLoader, QuantizeConfig, RGB8, Raster, Unstoppable, background_from,
    load_complete,
};
use proptest::prelude::*;
use weezl::BitOrder;
use weezl::encode::Encoder;

const PALETTE: [[u8; 3]; 8] = [
    [0, 0, 0],
    [255, 255, 255],
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [0, 255, 255],
    [255, 0, 255],
];

struct Frame<'a> {
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    interlaced: bool,
    pixels: &'a [u8],
}

fn frame(width: u16, height: u16, pixels: &[u8]) -> Frame<'_> {
    Frame {
        x: 0,
        y: 0,
        width,
        height,
        interlaced: false,
        pixels,
    }
}

fn sub_blocks(out: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(255) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0);
}

fn container(magic: &[u8; 6], width: u16, height: u16, loop_count: Option<u16>, frames: &[Frame]) -> Vec<u8> {
    let mut out = magic.to_vec();
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&[0x82, 0, 0]);
    for c in PALETTE {
        out.extend_from_slice(&c);
    }
    if let Some(count) = loop_count {
        out.extend_from_slice(&[0x21, 0xFF, 11]);
        out.extend_from_slice(b"NETSCAPE2.0");
        out.extend_from_slice(&[3, 1]);
        out.extend_from_slice(&count.to_le_bytes());
        out.push(0);
    }
    for f in frames {
        // 50 ms delay, keep disposal.
        out.extend_from_slice(&[0x21, 0xF9, 4, 0x04, 5, 0, 0, 0]);
        out.push(0x2C);
        for v in [f.x, f.y, f.width, f.height] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.push(if f.interlaced { 0x40 } else { 0 });
        out.push(3);
        let data = if magic.starts_with(b"GZF") {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
            enc.write_all(f.pixels).unwrap();
            enc.finish().unwrap()
        } else {
            Encoder::new(BitOrder::Lsb, 3).encode(f.pixels).unwrap()
        };
        sub_blocks(&mut out, &data);
    }
    out.push(0x3B);
    out
}

fn gif(width: u16, height: u16, loop_count: Option<u16>, frames: &[Frame]) -> Vec<u8> {
    container(b"GIF89a", width, height, loop_count, frames)
}

fn interlace(raster: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for (start, step) in [(0, 8), (4, 8), (2, 4), (1, 2)] {
        for row in (start..height).step_by(step) {
            out.extend_from_slice(&raster[row * width..(row + 1) * width]);
        }
    }
    out
}

fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 13 + seed) % 8) as u8).collect()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn load(data: Vec<u8>) -> DecodedImage {
    init_logging();
    let mut consumer = Collector::new();
    let status = load_complete("test", data, LoaderConfig::default(), &mut consumer, &Unstoppable);
    assert_eq!(status, LoadStatus::Complete, "warnings: {:?}", consumer.warnings);
    consumer.images.pop().unwrap().1
}

fn load_in_pieces(data: &[u8], piece: usize, chunk: usize) -> DecodedImage {
    let mut loader = ProgressiveLoader::new("test", LoaderConfig::default().with_chunk_size(chunk));
    let mut consumer = Collector::new();
    for part in data.chunks(piece.max(1)) {
        loader.push_data(part);
        loader.run(&mut consumer, &Unstoppable);
    }
    loader.finish_input();
    assert_eq!(loader.run(&mut consumer, &Unstoppable), LoadStatus::Complete);
    consumer.images.pop().unwrap().1
}

fn indices(image: &DecodedImage, frame: usize) -> Vec<u8> {
    match image.frames[frame].raster.as_ref().unwrap() {
        Raster::Indexed { pixels, .. } => pixels.buf().to_vec(),
        Raster::Rgb { .. } => panic!("expected indexed raster"),
    }
}

#[test]
fn interlaced_gif_matches_sequential() {
    let raster = pattern(40 * 27, 3);
    let sequential = gif(40, 27, None, &[frame(40, 27, &raster)]);
    let stream = interlace(&raster, 40, 27);
    let interlaced = gif(
        40,
        27,
        None,
        &[Frame {
            interlaced: true,
            ..frame(40, 27, &stream)
        }],
    );
    assert_eq!(indices(&load(sequential), 0), raster);
    assert_eq!(indices(&load(interlaced), 0), raster);
}

#[test]
fn gzf_matches_gif() {
    let raster = pattern(30 * 30, 1);
    let frames = [frame(30, 30, &raster)];
    let gif_image = load(gif(30, 30, None, &frames));
    let gzf_image = load(container(b"GZF87a", 30, 30, None, &frames));
    assert_eq!(gzf_image.format, ImageFormat::Gzf);
    assert_eq!(indices(&gif_image, 0), indices(&gzf_image, 0));
}

#[test]
fn animation_kinds_from_fixtures() {
    let a = pattern(16, 0);
    let b = pattern(16, 5);
    let classify = |bytes: Vec<u8>| classify_animation(&mut ImageBuffer::from_complete(bytes)).unwrap();

    let single = gif(4, 4, None, &[frame(4, 4, &a)]);
    let multi = gif(4, 4, None, &[frame(4, 4, &a), frame(4, 4, &b)]);
    let looping = gif(4, 4, Some(5), &[frame(4, 4, &a)]);
    assert_eq!(classify(single.clone()), AnimationKind::Static);
    assert_eq!(classify(multi.clone()), AnimationKind::MultiImage);
    assert_eq!(classify(looping.clone()), AnimationKind::Looping(5));

    assert_eq!(load(single).animation, AnimationKind::Static);
    let multi = load(multi);
    assert_eq!(multi.animation, AnimationKind::MultiImage);
    assert_eq!(multi.total_delay_ms(), 100);
    assert_eq!(load(looping).loop_count(), Some(5));
}

#[test]
fn clipping_and_ignored_frames() {
    let big = pattern(6 * 2, 0);
    let image = load(gif(
        8,
        4,
        None,
        &[
            Frame {
                x: 5,
                ..frame(6, 2, &big)
            },
            Frame {
                x: 9,
                ..frame(6, 2, &big)
            },
        ],
    ));
    let clipped = image.frames[0].raster.as_ref().unwrap();
    assert_eq!(clipped.width(), 3);
    assert_eq!(indices(&image, 0), [&big[0..3], &big[6..9]].concat());
    assert!(image.frames[1].control.ignore);
    assert!(image.frames[1].raster.is_none());
    assert_eq!(image.frames[1].control.delay_ms, 50);
}

#[test]
fn display_frames_are_palettized() {
    let image = load(gif(4, 4, None, &[frame(4, 4, &pattern(16, 2))]));
    let display = image.to_display(&LoaderConfig::default()).unwrap();
    assert_eq!(display.len(), 1);
    assert_eq!(display[0].palette.len(), 8);
}

#[test]
fn alpha_raster_is_composited_then_quantized() {
    let pixels = ImgVec::new(vec![RGB8::new(255, 0, 0); 4], 2, 2);
    let alpha = ImgVec::new(vec![0, 255, 128, 255], 2, 2);
    let image = DecodedImage::single(
        ImageFormat::Png,
        Raster::Rgb {
            pixels,
            alpha: Some(alpha),
        },
        None,
    );
    let config = LoaderConfig::default()
        .with_background(Background::Solid(RGB8::new(0, 0, 255)))
        .with_quantize(QuantizeConfig::default().with_max_colors(4));
    let display = image.to_display(&config).unwrap();
    let frame = &display[0];
    let px = frame.pixels.as_ref().unwrap().buf();
    assert_eq!(frame.palette[px[0] as usize], RGB8::new(0, 0, 255));
    assert_eq!(frame.palette[px[1] as usize], RGB8::new(255, 0, 0));
    let mid = frame.palette[px[2] as usize];
    assert!(mid.r > 0 && mid.r < 255 && mid.b > 0 && mid.b < 255);
}

#[test]
fn decoded_gif_tiles_behind_alpha_raster() {
    // Red then blue.
    let tile = load(gif(2, 1, None, &[frame(2, 1, &[2, 4])]));
    let background = background_from(tile.frames[0].raster.as_ref().unwrap());
    let pixels = ImgVec::new(vec![RGB8::new(0, 255, 0); 5], 5, 1);
    let alpha = ImgVec::new(vec![0, 0, 0, 255, 0], 5, 1);
    let image = DecodedImage::single(
        ImageFormat::Png,
        Raster::Rgb {
            pixels,
            alpha: Some(alpha),
        },
        None,
    );
    let display = image
        .to_display(&LoaderConfig::default().with_background(background))
        .unwrap();
    let frame = &display[0];
    let colors: Vec<RGB8> = frame
        .pixels
        .as_ref()
        .unwrap()
        .buf()
        .iter()
        .map(|&i| frame.palette[i as usize])
        .collect();
    let (red, blue, green) = (RGB8::new(255, 0, 0), RGB8::new(0, 0, 255), RGB8::new(0, 255, 0));
    assert_eq!(colors, [red, blue, red, green, red]);
}

#[test]
fn whole_and_tiny_pieces_agree() {
    let raster = pattern(33 * 21, 4);
    let data = gif(
        33,
        21,
        Some(0),
        &[
            frame(33, 21, &raster),
            Frame {
                interlaced: true,
                ..frame(33, 21, &interlace(&raster, 33, 21))
            },
        ],
    );
    let whole = load(data.clone());
    assert_eq!(load_in_pieces(&data, 1, 1), whole);
    assert_eq!(indices(&whole, 0), indices(&whole, 1));
}

fn two_frame_fixture(magic: &[u8; 6], seed: usize) -> Vec<u8> {
    let raster = pattern(50 * 20, seed);
    container(
        magic,
        50,
        20,
        None,
        &[
            Frame {
                interlaced: true,
                ..frame(50, 20, &interlace(&raster, 50, 20))
            },
            frame(50, 20, &raster),
        ],
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chunk_boundaries_do_not_matter(piece in 1usize..300, chunk in 1usize..600, seed in 0usize..8) {
        let data = two_frame_fixture(b"GIF89a", seed);
        let whole = load(data.clone());
        prop_assert_eq!(load_in_pieces(&data, piece, chunk), whole);
    }

    #[test]
    fn gzf_chunk_boundaries_do_not_matter(piece in 1usize..300, chunk in 1usize..600, seed in 0usize..8) {
        let data = two_frame_fixture(b"GZF89a", seed);
        let whole = load(data.clone());
        prop_assert_eq!(whole.format, ImageFormat::Gzf);
        prop_assert_eq!(load_in_pieces(&data, piece, chunk), whole);
    }
}
