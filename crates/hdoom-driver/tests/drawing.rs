mod common;

use common::{pixels, Rig};
use hdoom_driver::{
    Column, ColumnParams, CopyRect, DrawParams, Error, FillRect, Line, Resource, Span,
    SpanParams, UserSlice,
};
use hdoom_protocol::{Cmd, CmdType};
use pretty_assertions::assert_eq;

fn rect(x: u16, y: u16, width: u16, height: u16, color: u8) -> FillRect {
    FillRect {
        x,
        y,
        width,
        height,
        color,
    }
}

#[test]
fn fill_round_trip() {
    let rig = Rig::new();
    let s = rig.surface(64, 16);
    let rects = [rect(0, 0, 10, 10, 0x42)];
    assert_eq!(s.fill_rects(UserSlice::new(&rects)), Ok(1));

    let px = pixels(&s);
    for y in 0..16 {
        for x in 0..64 {
            let expected = if x < 10 && y < 10 { 0x42 } else { 0 };
            assert_eq!(px[y * 64 + x], expected, "pixel ({x}, {y})");
        }
    }
}

#[test]
fn batch_stops_at_first_invalid_item() {
    let rig = Rig::new();
    let s = rig.surface(64, 8);
    let rects = [
        rect(0, 0, 1, 1, 1),
        rect(1, 0, 1, 1, 2),
        rect(60, 0, 5, 1, 3),
        rect(2, 0, 1, 1, 4),
    ];
    assert_eq!(s.fill_rects(UserSlice::new(&rects)), Ok(2));
    assert_eq!(&pixels(&s)[..4], &[1, 2, 0, 0]);

    assert!(matches!(
        s.fill_rects(UserSlice::new(&rects[2..])),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn unreadable_items_end_the_batch() {
    let rig = Rig::new();
    let s = rig.surface(64, 8);
    let rects = [rect(0, 0, 1, 1, 5), rect(1, 0, 1, 1, 6)];
    assert_eq!(s.fill_rects(UserSlice::with_len(&rects, 5)), Ok(2));
    assert_eq!(
        s.fill_rects(UserSlice::with_len(&rects[..0], 1)),
        Err(Error::Fault)
    );
    assert_eq!(s.fill_rects(UserSlice::empty()), Ok(0));
}

#[test]
fn degenerate_rectangles_are_accepted_without_drawing() {
    let rig = Rig::new();
    let s = rig.surface(64, 8);
    rig.sim.take_trace();
    let rects = [rect(500, 500, 0, 3, 1), rect(0, 0, 4, 0, 1)];
    assert_eq!(s.fill_rects(UserSlice::new(&rects)), Ok(2));
    let copies = [CopyRect {
        dst_x: 900,
        ..CopyRect::default()
    }];
    let src = Resource::from(rig.surface(64, 8));
    assert_eq!(s.copy_rects(&src, UserSlice::new(&copies)), Ok(1));
    assert!(!rig
        .sim
        .take_trace()
        .iter()
        .any(|c| matches!(c, Cmd::FillRect { .. } | Cmd::CopyRect { .. })));
}

#[test]
fn copy_checks_destination_then_source() {
    let rig = Rig::new();
    let dst = rig.surface(64, 8);
    let src_surface = rig.surface(64, 8);
    src_surface
        .fill_rects(UserSlice::new(&[rect(0, 0, 4, 4, 0x11)]))
        .unwrap();
    let src = Resource::from(src_surface);

    let ok = CopyRect {
        dst_x: 10,
        dst_y: 1,
        src_x: 0,
        src_y: 0,
        width: 4,
        height: 4,
    };
    let bad_src = CopyRect { src_x: 62, ..ok };
    assert_eq!(dst.copy_rects(&src, UserSlice::new(&[ok, bad_src])), Ok(1));
    assert!(matches!(
        dst.copy_rects(&src, UserSlice::new(&[CopyRect { dst_y: 6, ..ok }])),
        Err(Error::InvalidArgument("copy destination outside surface"))
    ));

    let px = pixels(&dst);
    assert_eq!(&px[64 + 10..64 + 14], &[0x11; 4]);
    assert_eq!(px[64 + 14], 0);
}

#[test]
fn lines_are_normalised_and_bounded() {
    let rig = Rig::new();
    let s = rig.surface(64, 8);
    let lines = [
        Line {
            ax: 9,
            ay: 5,
            bx: 0,
            by: 5,
            color: 4,
        },
        Line {
            ax: 3,
            ay: 7,
            bx: 3,
            by: 0,
            color: 8,
        },
        Line {
            ax: 0,
            ay: 0,
            bx: 64,
            by: 0,
            color: 1,
        },
    ];
    rig.sim.take_trace();
    assert_eq!(s.draw_lines(UserSlice::new(&lines)), Ok(2));

    let trace = rig.sim.take_trace();
    assert!(trace
        .windows(2)
        .any(|w| w == [Cmd::XyA { x: 3, y: 0 }, Cmd::XyB { x: 3, y: 7 }]));

    let px = pixels(&s);
    assert_eq!(&px[5 * 64..5 * 64 + 10], &[4, 4, 4, 8, 4, 4, 4, 4, 4, 4]);
    assert_eq!(px[3], 8);
    assert_eq!(px[7 * 64 + 3], 8);
}

#[test]
fn background_tiles_the_flat() {
    let rig = Rig::new();
    let s = rig.surface(128, 70);
    let data: Vec<u8> = (0..4096).map(|i| (i / 64) as u8 + 1).collect();
    let flat = Resource::from(rig.device.create_flat(UserSlice::new(&data)).unwrap());
    assert_eq!(s.draw_background(&flat), Ok(0));

    let px = pixels(&s);
    assert_eq!(px[0], 1);
    assert_eq!(px[63 * 128 + 100], 64);
    assert_eq!(px[65 * 128 + 127], 2);

    let not_flat = Resource::from(rig.surface(64, 1));
    assert!(matches!(
        s.draw_background(&not_flat),
        Err(Error::InvalidArgument(_))
    ));
}

/// Resources come first so they are released before the rig detaches the device.
struct ColumnRig {
    texture: Resource,
    maps: Resource,
    rig: Rig,
}

/// Texture bytes are their own index; map 0 adds one, map 1 inverts.
fn column_rig() -> ColumnRig {
    let rig = Rig::new();
    let texels: Vec<u8> = (0..=255).collect();
    let texture = Resource::from(
        rig.device
            .create_texture(256, 0, UserSlice::new(&texels))
            .unwrap(),
    );
    let mut maps: Vec<u8> = (0..=255u8).map(|v| v.wrapping_add(1)).collect();
    maps.extend((0..=255u8).map(|v| !v));
    let maps = Resource::from(
        rig.device
            .create_colormaps(2, UserSlice::new(&maps))
            .unwrap(),
    );
    ColumnRig { texture, maps, rig }
}

fn column(x: u16, y1: u16, y2: u16, offset: u32, map: u8) -> Column {
    Column {
        x,
        y1,
        y2,
        ustart: 0,
        ustep: 1 << 16,
        texture_offset: offset,
        colormap_idx: map,
    }
}

fn column_pixels(px: &[u8], x: usize, ys: std::ops::RangeInclusive<usize>) -> Vec<u8> {
    ys.map(|y| px[y * 64 + x]).collect()
}

#[test]
fn columns_sample_translate_and_shade() {
    let cr = column_rig();
    let s = cr.rig.surface(64, 8);
    let params = ColumnParams {
        flags: DrawParams::TRANSLATE | DrawParams::COLORMAP,
        texture: Some(&cr.texture),
        translations: Some(&cr.maps),
        translation_idx: 0,
        colormaps: Some(&cr.maps),
    };
    let columns = [column(3, 3, 0, 10, 1), column(4, 0, 1, 20, 0)];
    assert_eq!(s.draw_columns(&params, UserSlice::new(&columns)), Ok(2));

    let px = pixels(&s);
    assert_eq!(column_pixels(&px, 3, 0..=3), vec![!11, !12, !13, !14]);
    assert_eq!(column_pixels(&px, 4, 0..=1), vec![22, 23]);
}

#[test]
fn column_validation() {
    let cr = column_rig();
    let s = cr.rig.surface(64, 8);
    let plain = ColumnParams {
        texture: Some(&cr.texture),
        ..ColumnParams::default()
    };

    let no_texture = ColumnParams::default();
    assert!(matches!(
        s.draw_columns(&no_texture, UserSlice::new(&[column(0, 0, 1, 0, 0)])),
        Err(Error::InvalidArgument(_))
    ));

    let outside = column(64, 0, 1, 0, 0);
    assert!(s.draw_columns(&plain, UserSlice::new(&[outside])).is_err());

    let reserved = Column {
        ustep: 1 << 30,
        ..column(0, 0, 1, 0, 0)
    };
    assert!(s.draw_columns(&plain, UserSlice::new(&[reserved])).is_err());

    let shaded = ColumnParams {
        flags: DrawParams::COLORMAP,
        colormaps: Some(&cr.maps),
        ..plain
    };
    let bad_map = column(0, 0, 1, 0, 2);
    assert_eq!(
        s.draw_columns(&shaded, UserSlice::new(&[column(0, 0, 1, 0, 1), bad_map])),
        Ok(1)
    );
}

#[test]
fn colormap_address_is_only_sent_on_change() {
    let cr = column_rig();
    let s = cr.rig.surface(64, 8);
    let params = ColumnParams {
        flags: DrawParams::COLORMAP,
        texture: Some(&cr.texture),
        colormaps: Some(&cr.maps),
        ..ColumnParams::default()
    };
    let columns: Vec<Column> = [0, 0, 1, 1, 0]
        .iter()
        .enumerate()
        .map(|(x, &map)| column(x as u16, 0, 2, 0, map))
        .collect();
    cr.rig.sim.take_trace();
    assert_eq!(s.draw_columns(&params, UserSlice::new(&columns)), Ok(5));

    let trace = cr.rig.sim.take_trace();
    let binds = trace
        .iter()
        .filter(|c| matches!(c, Cmd::ColormapAddr { .. }))
        .count();
    assert_eq!(binds, 3);
    assert_eq!(
        trace.iter().filter(|c| matches!(c, Cmd::DrawColumn { .. })).count(),
        5
    );
}

#[test]
fn fuzz_overrides_other_flags() {
    let cr = column_rig();
    let s = cr.rig.surface(64, 8);
    s.fill_rects(UserSlice::new(&[rect(0, 0, 64, 8, 7)])).unwrap();
    let params = ColumnParams {
        flags: DrawParams::FUZZ | DrawParams::TRANSLATE,
        colormaps: Some(&cr.maps),
        ..ColumnParams::default()
    };
    cr.rig.sim.take_trace();
    assert_eq!(
        s.draw_columns(&params, UserSlice::new(&[column(5, 2, 4, 0, 0)])),
        Ok(1)
    );
    let trace = cr.rig.sim.take_trace();
    assert!(trace.contains(&Cmd::DrawParams(DrawParams::FUZZ)));
    let types: Vec<CmdType> = trace.iter().map(Cmd::ty).collect();
    for ty in [
        CmdType::TexturePt,
        CmdType::TranslationAddr,
        CmdType::UStart,
    ] {
        assert!(!types.contains(&ty), "{ty:?} emitted for a fuzz column");
    }
    // Fuzz samples neighbours above and below, including ones it already shaded.
    let px = pixels(&s);
    assert_eq!(column_pixels(&px, 5, 2..=4), vec![8, 9, 8]);
    assert_eq!(px[5 * 64 + 5], 7);

    let no_maps = ColumnParams {
        flags: DrawParams::FUZZ,
        ..ColumnParams::default()
    };
    assert!(s
        .draw_columns(&no_maps, UserSlice::new(&[column(5, 2, 4, 0, 0)]))
        .is_err());
}

#[test]
fn spans_sample_the_flat() {
    let cr = column_rig();
    let s = cr.rig.surface(64, 8);
    let data: Vec<u8> = (0..4096).map(|i| (i % 64) as u8).collect();
    let flat = Resource::from(cr.rig.device.create_flat(UserSlice::new(&data)).unwrap());

    let span = Span {
        x1: 7,
        x2: 0,
        y: 2,
        ustart: 3 << 16,
        vstart: 0,
        ustep: 1 << 16,
        vstep: 1 << 16,
        colormap_idx: 1,
    };
    let plain = SpanParams::new(&flat);
    assert_eq!(s.draw_spans(&plain, UserSlice::new(&[span])), Ok(1));
    assert_eq!(&pixels(&s)[2 * 64..2 * 64 + 8], &[3, 4, 5, 6, 7, 8, 9, 10]);

    let shaded = SpanParams {
        flags: DrawParams::COLORMAP | DrawParams::FUZZ,
        colormaps: Some(&cr.maps),
        ..SpanParams::new(&flat)
    };
    let row3 = Span { y: 3, ..span };
    assert_eq!(s.draw_spans(&shaded, UserSlice::new(&[row3])), Ok(1));
    assert_eq!(&pixels(&s)[3 * 64..3 * 64 + 3], &[!3, !4, !5]);

    let outside = Span { x2: 64, ..span };
    assert!(s.draw_spans(&plain, UserSlice::new(&[outside])).is_err());
    let wrong_kind = SpanParams::new(&cr.texture);
    assert!(matches!(
        s.draw_spans(&wrong_kind, UserSlice::new(&[span])),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn span_batch_stops_at_a_missing_colormap() {
    let cr = column_rig();
    let s = cr.rig.surface(64, 8);
    let data: Vec<u8> = (0..4096).map(|i| (i % 64) as u8).collect();
    let flat = Resource::from(cr.rig.device.create_flat(UserSlice::new(&data)).unwrap());
    let shaded = SpanParams {
        flags: DrawParams::COLORMAP,
        colormaps: Some(&cr.maps),
        ..SpanParams::new(&flat)
    };
    let good = Span {
        x1: 0,
        x2: 3,
        y: 4,
        ustep: 1 << 16,
        colormap_idx: 0,
        ..Span::default()
    };
    let bad = Span {
        y: 5,
        colormap_idx: 2,
        ..good
    };

    assert_eq!(s.draw_spans(&shaded, UserSlice::new(&[good, bad])), Ok(1));
    let px = pixels(&s);
    assert_eq!(&px[4 * 64..4 * 64 + 4], &[1, 2, 3, 4]);
    assert_eq!(&px[5 * 64..5 * 64 + 4], &[0; 4]);
    assert!(matches!(
        s.draw_spans(&shaded, UserSlice::new(&[bad])),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn span_coordinates_drop_bits_above_the_flat_range() {
    let cr = column_rig();
    let s = cr.rig.surface(64, 8);
    let data: Vec<u8> = (0..4096).map(|i| (i % 64) as u8).collect();
    let flat = Resource::from(cr.rig.device.create_flat(UserSlice::new(&data)).unwrap());
    let span = Span {
        x1: 0,
        x2: 3,
        y: 1,
        ustart: 0xffc0_0000 | 5 << 16,
        vstart: 0x8000_0000,
        ustep: 0x4000_0000 | 1 << 16,
        vstep: 0,
        colormap_idx: 0,
    };
    cr.rig.sim.take_trace();

    assert_eq!(
        s.draw_spans(&SpanParams::new(&flat), UserSlice::new(&[span])),
        Ok(1)
    );
    let trace = cr.rig.sim.take_trace();
    assert!(trace.contains(&Cmd::UStart(5 << 16)));
    assert!(trace.contains(&Cmd::UStep(1 << 16)));
    assert!(trace.contains(&Cmd::VStart(0)));
    assert_eq!(&pixels(&s)[64..68], &[5, 6, 7, 8]);
}
