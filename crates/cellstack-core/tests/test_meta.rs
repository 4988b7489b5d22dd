mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cellstack_core::config::CompositionConfig;
use cellstack_core::listener::EventKind;
use cellstack_core::plane::Image;
use cellstack_core::roi::{FrameSel, Roi, RoiKind};
use cellstack_core::stack::{ChannelSource, ChannelType, LoadProgress, MetaStack};
use cellstack_core::{ImageStack, Stack, StackError};
use common::*;

struct Quiet;
impl LoadProgress for Quiet {}

#[test]
fn test_geometry_mismatch_keeps_channel_list() {
    let phase_file = imagej_stack(4, 3, 1, 2);
    let wide_file = imagej_stack(5, 3, 1, 2);
    let phase = Arc::new(Stack::open(phase_file.path()).unwrap());
    let wide = Arc::new(Stack::open(wide_file.path()).unwrap());

    let meta = MetaStack::new();
    meta.add_stack(&phase, "phase").unwrap();
    meta.add_stack(&wide, "wide").unwrap();
    assert_eq!(meta.add_channel("phase", 0, "Phase", ChannelType::PhaseContrast).unwrap(), 0);

    let err = meta
        .add_channel("wide", 0, "Wide", ChannelType::Fluorescence)
        .unwrap_err();
    assert!(matches!(err, StackError::DimensionMismatch { .. }));
    assert_eq!(meta.n_channels(), 1);
    assert_eq!(meta.channels()[0].label, "Phase");
}

#[test]
fn test_duplicate_stack_name_rejected() {
    let file = imagej_stack(4, 3, 1, 1);
    let stack = Arc::new(Stack::open(file.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "a").unwrap();
    assert!(matches!(meta.add_stack(&stack, "a"), Err(StackError::DuplicateStack(_))));
}

#[test]
fn test_real_and_computed_channels() {
    let file = imagej_stack(4, 3, 2, 3);
    let stack = Arc::new(Stack::open(file.path()).unwrap());

    let meta = MetaStack::new();
    meta.add_stack(&stack, "cells").unwrap();
    meta.add_channel("cells", 1, "GFP", ChannelType::Fluorescence).unwrap();
    // Inverts channel 0 of the composite.
    meta.add_computed_channel(
        |meta: &MetaStack, frame, scale| match meta.get_image(0, frame, scale)? {
            Image::U8(a) => Ok(Image::U8(a.mapv(|v| 255 - v))),
            Image::U16(a) => Ok(Image::U16(a.mapv(|v| u16::MAX - v))),
        },
        true,
        "inverted",
        ChannelType::Segmentation,
    );

    assert_eq!(meta.n_channels(), 2);
    assert_eq!((meta.width(), meta.height(), meta.n_frames()), (4, 3, 3));

    // Frame 2, stack channel 1 is page 2 * 2 + 1 = 5.
    assert_eq!(meta.get_image(0, 2, None).unwrap().view().min_max(), Some((5, 5)));
    assert_eq!(meta.get_image(1, 2, None).unwrap().view().min_max(), Some((250, 250)));

    let half = meta.get_image(1, 0, Some(0.5)).unwrap();
    assert_eq!((half.width(), half.height()), (2, 2));

    let mut seen = None;
    meta.with_image(0, 1, None, &mut |view| seen = view.min_max()).unwrap();
    assert_eq!(seen, Some((3, 3)));

    let infos = meta.channels();
    assert_eq!(
        infos[0].source,
        ChannelSource::Real {
            stack: "cells".into(),
            channel: 1
        }
    );
    assert_eq!(infos[1].source, ChannelSource::Computed { supports_scale: true });
}

#[test]
fn test_reloaded_stack_with_new_size_fails_at_read() {
    let small = imagej_stack(4, 3, 1, 2);
    let large = imagej_stack(6, 3, 1, 2);
    let stack = Arc::new(Stack::open(small.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "s").unwrap();
    meta.add_channel("s", 0, "s", ChannelType::PhaseContrast).unwrap();

    stack.load(large.path()).unwrap();
    assert!(matches!(meta.get_image(0, 0, None), Err(StackError::DimensionMismatch { .. })));
}

#[test]
fn test_image_events_forwarded() {
    let file = imagej_stack(4, 3, 1, 2);
    let stack = Arc::new(Stack::open(file.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "s").unwrap();

    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    meta.add_listener(
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        EventKind::Image,
    );

    stack.close();
    assert_eq!(events.load(Ordering::SeqCst), 1);

    drop(meta);
    stack.load(file.path()).unwrap();
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dropped_stack_is_unknown() {
    let file = imagej_stack(4, 3, 1, 2);
    let stack = Arc::new(Stack::open(file.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "s").unwrap();
    meta.add_channel("s", 0, "s", ChannelType::PhaseContrast).unwrap();

    drop(stack);
    assert!(matches!(meta.get_image(0, 0, None), Err(StackError::UnknownStack(_))));
}

#[test]
fn test_remove_stack_drops_channels() {
    let file = imagej_stack(4, 3, 2, 2);
    let stack = Arc::new(Stack::open(file.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "s").unwrap();
    meta.add_channel("s", 0, "a", ChannelType::PhaseContrast).unwrap();
    meta.add_channel("s", 1, "b", ChannelType::Fluorescence).unwrap();

    meta.remove_stack("s").unwrap();
    assert_eq!(meta.n_channels(), 0);
    assert!(meta.geometry().is_none());
    assert!(meta.stack_names().is_empty());
}

#[test]
fn test_channel_index_checked() {
    let file = imagej_stack(4, 3, 2, 2);
    let stack = Arc::new(Stack::open(file.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "s").unwrap();
    assert!(matches!(
        meta.add_channel("s", 2, "x", ChannelType::Fluorescence),
        Err(StackError::Index { .. })
    ));
    assert_eq!(meta.n_channels(), 0);
}

#[test]
fn test_metastack_rois() {
    let file = imagej_stack(4, 3, 1, 2);
    let stack = Arc::new(Stack::open(file.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "s").unwrap();
    meta.add_channel("s", 0, "s", ChannelType::PhaseContrast).unwrap();

    let roi = Roi::raw(vec![0], vec![0]).unwrap();
    meta.set_rois(vec![("1".into(), roi)], RoiKind::Raw, FrameSel::Frame(1))
        .unwrap();
    assert!(meta.get_rois(FrameSel::Frame(1)).is_some());
    assert!(stack.get_rois(FrameSel::Frame(1)).is_none());
    assert!(meta.set_rois(Vec::new(), RoiKind::Raw, FrameSel::Frame(2)).is_err());
}

fn roi_area(stack: &dyn ImageStack, frame: usize, label: &str) -> Option<usize> {
    stack.get_roi(frame, label).map(|roi| roi.area())
}

#[test]
fn test_roi_lookup_by_label_on_both_stack_kinds() {
    let file = imagej_stack(4, 3, 1, 2);
    let stack = Arc::new(Stack::open(file.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "s").unwrap();
    meta.add_channel("s", 0, "s", ChannelType::PhaseContrast).unwrap();

    let roi = Roi::raw(vec![0, 1], vec![2, 2]).unwrap();
    meta.set_rois(vec![("cell".into(), roi.clone())], RoiKind::Raw, FrameSel::All)
        .unwrap();
    stack
        .set_rois(vec![("cell".into(), roi)], RoiKind::Raw, FrameSel::Frame(0))
        .unwrap();

    assert_eq!(roi_area(&meta, 1, "cell"), Some(2));
    assert_eq!(roi_area(&meta, 1, "other"), None);
    assert_eq!(roi_area(&*stack, 0, "cell"), Some(2));
    assert_eq!(roi_area(&*stack, 1, "cell"), None);
}

#[test]
fn test_metastack_invalid_scale_rejected() {
    let file = imagej_stack(4, 3, 1, 2);
    let stack = Arc::new(Stack::open(file.path()).unwrap());
    let meta = MetaStack::new();
    meta.add_stack(&stack, "s").unwrap();
    meta.add_channel("s", 0, "s", ChannelType::PhaseContrast).unwrap();
    meta.add_computed_channel(|_, _, _| panic!("rendered with a bad scale"), true, "c", ChannelType::Segmentation);

    for channel in 0..2 {
        for scale in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                meta.get_image(channel, 0, Some(scale)),
                Err(StackError::InvalidScale { .. })
            ));
        }
    }
    assert_eq!(meta.get_image(0, 1, Some(0.5)).unwrap().width(), 2);
}

#[test]
fn test_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let phase = imagej_stack(4, 3, 1, 2);
    let labels: Vec<_> = (0..2)
        .map(|_| {
            let mut page = vec![0u8; 12];
            page[0] = 1;
            page[5] = 2;
            page[6] = 2;
            page
        })
        .collect();
    let seg = write_tiff_u8(4, 3, &labels, &imagej_description(None, Some(2), None));
    std::fs::copy(phase.path(), dir.path().join("phase.tif")).unwrap();
    std::fs::copy(seg.path(), dir.path().join("seg.tif")).unwrap();

    let text = r#"
[[stacks]]
name = "phase"
path = "phase.tif"

[[stacks]]
name = "seg"
path = "seg.tif"

[[channels]]
stack = "phase"
type = "phase-contrast"

[[channels]]
stack = "seg"
label = "Cells"
type = "segmentation"
"#;
    let config_path = dir.path().join("compose.toml");
    std::fs::write(&config_path, text).unwrap();

    let config = CompositionConfig::load(&config_path).unwrap();
    let (meta, stacks) = MetaStack::from_config(&config, &Quiet).unwrap();
    assert_eq!(stacks.len(), 2);
    assert_eq!(meta.stack_names(), vec!["phase".to_string(), "seg".to_string()]);

    let channels = meta.channels();
    assert_eq!(channels[0].label, "phase:0");
    assert_eq!(channels[1].label, "Cells");
    assert_eq!(channels[1].kind, ChannelType::Segmentation);

    let labels = meta.get_image(1, 0, None).unwrap();
    let rois = cellstack_core::roi::rois_from_labels(labels.view());
    assert_eq!(rois.len(), 2);
    assert_eq!(rois[1].1.area(), 2);
}
