//! Background, detection and photometry on synthetic 128x128 frames.

use approx::assert_abs_diff_eq;
use chrono::{TimeZone, Utc};
use lightcurve::{
    ApertureDetector, BackgroundEstimator, CcdPosition, CoordinateTransform, FluxExtractor,
    PixelCoord, SensorId, SipWcs, SkyCoord, WcsCoefficients,
};
use ndarray::Array2;
use test_helpers::{add_gaussian_source, gaussian_flux_above, noisy_frame, output_path};

const SHAPE: (usize, usize) = (128, 128);
const PEAK: f64 = 1000.0;
const PSF_SIGMA: f64 = 1.5;
const SOURCES: [(f64, f64); 2] = [(32.0, 32.0), (96.0, 96.0)];
const SCALE_DEG: f64 = 0.005;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn field_center() -> SkyCoord {
    SkyCoord::new(83.6, 22.0)
}

/// Raw frame at sky level 100 with the two sources shifted by `dx` columns.
fn raw_frame(seed: u64, dx: f64) -> Array2<f64> {
    let mut frame = noisy_frame(SHAPE, 100.0, 0.5, seed);
    for &(r, c) in &SOURCES {
        add_gaussian_source(&mut frame, r, c + dx, PEAK, PSF_SIGMA);
    }
    frame
}

/// Transform of a frame whose pointing moved so that sky features sit `dx`
/// columns further right.
fn frame_wcs(dx: f64) -> SipWcs {
    let coeffs = WcsCoefficients::tangent_plane(field_center(), [64.5 + dx, 64.5], SCALE_DEG);
    SipWcs::new(coeffs, SHAPE).unwrap()
}

fn source_flux() -> f64 {
    gaussian_flux_above(SHAPE, SOURCES[0].0, SOURCES[0].1, PEAK, PSF_SIGMA, 0.0)
}

#[test]
fn test_single_frame_end_to_end() {
    init_logging();
    let raw = raw_frame(1, 0.0);

    let model = BackgroundEstimator::default()
        .estimate(&raw.view(), CcdPosition::RightTop)
        .unwrap();
    let background = model.total();
    for &(r, c) in &[(5usize, 5usize), (5, 120), (64, 10), (120, 10), (64, 64), (10, 64)] {
        assert_abs_diff_eq!(background[[r, c]], 100.0, epsilon = 1.0);
    }

    let corrected = &raw - &background;
    std::fs::write(
        output_path("end_to_end_corrected.bin"),
        lightcurve::store::encode_array(&corrected.view()),
    )
    .unwrap();

    let wcs = frame_wcs(0.0);
    let sensor = SensorId { camera: 1, ccd: 2 };
    let apertures = ApertureDetector::default()
        .detect(&corrected.view(), &wcs, "frame0", sensor)
        .unwrap();
    assert_eq!(apertures.len(), 2);
    for (aperture, &(r, c)) in apertures.iter().zip(&SOURCES) {
        let center = wcs.world_to_pixel(aperture.centroid).unwrap();
        assert_abs_diff_eq!(center.x, c, epsilon = 0.3);
        assert_abs_diff_eq!(center.y, r, epsilon = 0.3);
        assert!(aperture.pixels.len() >= 4);
    }

    let observed_at = Utc.with_ymd_and_hms(2018, 7, 25, 19, 30, 0).unwrap();
    let extraction =
        FluxExtractor::default().extract(&corrected.view(), &wcs, observed_at, &apertures);
    assert!(extraction.rejected.is_empty());
    assert_eq!(extraction.samples.len(), 2);

    let expected = source_flux();
    for sample in &extraction.samples {
        let ratio = sample.in_aperture_flux / expected;
        assert!((ratio - 1.0).abs() < 0.02, "{}: ratio {ratio}", sample.aperture_label);
        // The padded box around a corrected source holds only sky and PSF wings
        assert!(sample.mask_flux.abs() < 0.05 * expected, "mask {}", sample.mask_flux);
    }
}

#[test]
fn test_apertures_follow_the_sky_across_pointings() {
    init_logging();
    let estimator = BackgroundEstimator::default();
    let detector = ApertureDetector::default();
    let extractor = FluxExtractor::default();
    let sensor = SensorId { camera: 1, ccd: 2 };

    let reference = estimator
        .correct(&raw_frame(2, 0.0).view(), CcdPosition::RightTop)
        .unwrap();
    let apertures = detector
        .detect(&reference.view(), &frame_wcs(0.0), "ref", sensor)
        .unwrap();
    assert_eq!(apertures.len(), 2);

    // Same stars, pointing moved by three pixels
    let shifted = estimator
        .correct(&raw_frame(3, 3.0).view(), CcdPosition::RightTop)
        .unwrap();
    let t = Utc.with_ymd_and_hms(2018, 7, 25, 20, 0, 0).unwrap();
    let extraction = extractor.extract(&shifted.view(), &frame_wcs(3.0), t, &apertures);

    assert_eq!(extraction.samples.len(), 2);
    let expected = source_flux();
    for sample in &extraction.samples {
        assert!((sample.in_aperture_flux / expected - 1.0).abs() < 0.02);
    }

    // Reading the shifted frame with the reference pointing loses flux
    let misaligned = extractor.extract(&shifted.view(), &frame_wcs(0.0), t, &apertures);
    for (good, bad) in extraction.samples.iter().zip(&misaligned.samples) {
        assert!(bad.in_aperture_flux < 0.95 * good.in_aperture_flux);
    }
}

#[test]
fn test_frame_elsewhere_on_sky_yields_no_samples() {
    init_logging();
    let corrected = BackgroundEstimator::default()
        .correct(&raw_frame(4, 0.0).view(), CcdPosition::LeftTop)
        .unwrap();
    let apertures = ApertureDetector::default()
        .detect(&corrected.view(), &frame_wcs(0.0), "here", SensorId { camera: 1, ccd: 1 })
        .unwrap();
    assert_eq!(apertures.len(), 2);

    let elsewhere = SipWcs::new(
        WcsCoefficients::tangent_plane(SkyCoord::new(200.0, -40.0), [64.5, 64.5], SCALE_DEG),
        SHAPE,
    )
    .unwrap();
    let extraction = FluxExtractor::default().extract(
        &corrected.view(),
        &elsewhere,
        Utc.with_ymd_and_hms(2018, 7, 26, 0, 0, 0).unwrap(),
        &apertures,
    );
    assert!(extraction.samples.is_empty());
    assert!(extraction.rejected.is_empty());
}

#[test]
fn test_pixel_sky_roundtrip_inside_footprint() {
    let wcs = frame_wcs(0.0);
    let footprint = wcs.footprint();
    for &(x, y) in &[(0.0, 0.0), (10.3, 100.7), (64.0, 64.0), (127.0, 5.5)] {
        let sky = wcs.pixel_to_world(PixelCoord::new(x, y));
        let back = wcs.world_to_pixel(sky).unwrap();
        assert_abs_diff_eq!(back.x, x, epsilon = 1e-6);
        assert_abs_diff_eq!(back.y, y, epsilon = 1e-6);
        if x > 0.0 && y > 0.0 && x < 127.0 && y < 127.0 {
            assert!(footprint.contains(&sky));
        }
    }
}
