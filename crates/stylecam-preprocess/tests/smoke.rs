use stylecam_camera::testing::SyntheticCamera;
use stylecam_camera::{BufferPool, PixelFormat};
use stylecam_preprocess::{export, ConversionMatrix, Preprocessor, ResizeFilter};

#[test]
fn cpu_smoke() {
    // Fake mid-gray NV12 640×480
    let frame = SyntheticCamera::nv12_frame(640, 480, 128, 128, 128).unwrap();

    let pp = Preprocessor::new(256, 256);
    let out = pp.run(&frame).unwrap();
    assert_eq!(out.format, PixelFormat::Rgba8);
    assert_eq!(out.dimensions(), (256, 256));
    assert!(out.buffer.chunks_exact(4).all(|px| px[0].abs_diff(130) <= 2 && px[3] == 255));
}

#[test]
fn pooled_run_releases_intermediate_frame() {
    let sensor = BufferPool::for_frames(64, 48, 4, 1);
    let working = BufferPool::for_frames(16, 16, 4, 2);
    let pp = Preprocessor::with_pools(16, 16, ConversionMatrix::default(), sensor.clone(), working.clone(), ResizeFilter::Triangle);

    let frame = SyntheticCamera::nv12_frame(64, 48, 200, 128, 128).unwrap();
    let a = pp.run(&frame).unwrap();
    let b = pp.run(&frame).unwrap();
    assert_eq!(sensor.outstanding(), 0);
    assert_eq!(working.outstanding(), 2);
    assert!(pp.run(&frame).unwrap_err().is_allocation());
    drop((a, b));
    assert_eq!(working.outstanding(), 0);
}

#[test]
fn png_export_writes_letterboxed_still() {
    let frame = SyntheticCamera::nv12_frame(64, 32, 235, 128, 128).unwrap();
    let rgba = Preprocessor::new(64, 32).run(&frame).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    export::save_png(&rgba, 32, 32, &path).unwrap();

    let img = image::open(&path).unwrap().to_rgba8();
    assert_eq!(img.dimensions(), (32, 32));
    assert_eq!(img.get_pixel(16, 0).0, [0, 0, 0, 0]);
    assert_eq!(img.get_pixel(16, 16).0[3], 255);
}
