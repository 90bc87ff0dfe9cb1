use image::{Rgba, RgbaImage};

use paintcore::components::selection::SelectionOutline;
use paintcore::components::tools::Tool;
use paintcore::error::{EditorError, Result};
use paintcore::io::encode_png;
use paintcore::ops::generate::{GenerationRequest, ImageGenerator};
use paintcore::ops::shapes::ShapeFillMode;
use paintcore::ops::text::font_from_bytes;
use paintcore::settings::{BindableAction, EditorSettings, KeyCombo};
use paintcore::{BlendMode, Document, EditorSession};

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

fn session_with(w: u32, h: u32, bg: Rgba<u8>) -> EditorSession {
    EditorSession::with_document(Document::new(w, h, bg).unwrap(), EditorSettings::default())
}

fn click(s: &mut EditorSession, x: f32, y: f32) {
    s.pointer_down(x, y, false);
    s.pointer_up(x, y);
}

fn close(a: u8, b: u8) -> bool {
    (a as i32 - b as i32).abs() <= 1
}

struct FixedGenerator(Result<Vec<u8>>);

impl ImageGenerator for FixedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>> {
        assert!(request.transparent);
        match &self.0 {
            Ok(bytes) => Ok(bytes.clone()),
            Err(e) => Err(EditorError::Generation(e.to_string())),
        }
    }
}

#[test]
fn export_then_import_reproduces_composite() {
    let mut s = session_with(40, 30, Rgba([255, 255, 255, 255]));
    s.set_primary_color("#3366cc").unwrap();
    s.set_brush_size(8.0);
    s.pointer_down(5.0, 5.0, false);
    s.pointer_move(30.0, 20.0);
    s.pointer_up(30.0, 20.0);
    let top = s.add_layer();
    s.set_layer_opacity(top, 0.5).unwrap();
    s.set_tool(Tool::Fill);
    click(&mut s, 1.0, 1.0);

    let expected = s.flatten();
    let blob = s.export_to_raster_blob().unwrap();

    let mut fresh = session_with(40, 30, CLEAR);
    fresh.import_raster_as_layer(&blob).unwrap();
    assert_eq!(fresh.document().active_layer().pixels.to_rgba_image(), expected);
    assert_eq!(s.export_file_name(), "image_40x30.png");
}

#[test]
fn undo_redo_is_idempotent() {
    let mut s = session_with(24, 24, CLEAR);
    s.set_primary_color("#ff0000").unwrap();
    click(&mut s, 12.0, 12.0);
    let after = s.flatten();

    assert!(s.undo());
    let before = s.flatten();
    assert_ne!(before, after);
    assert!(s.redo());
    assert_eq!(s.flatten(), after);
    assert!(s.undo());
    assert_eq!(s.flatten(), before);

    // Boundaries are silent no-ops.
    assert!(!s.undo());
    assert_eq!(s.flatten(), before);
}

#[test]
fn new_action_discards_redo() {
    let mut s = session_with(16, 16, CLEAR);
    click(&mut s, 4.0, 4.0);
    assert!(s.undo());
    assert!(s.history().can_redo());
    s.add_layer();
    assert!(!s.history().can_redo());
    assert!(!s.redo());
}

#[test]
fn every_layer_keeps_canvas_dimensions() {
    let mut s = session_with(50, 40, Rgba([255, 255, 255, 255]));
    let a = s.add_layer();
    s.duplicate_layer(a).unwrap();
    let png = encode_png(&RgbaImage::from_pixel(10, 90, Rgba([0, 255, 0, 255]))).unwrap();
    s.import_raster_as_layer(&png).unwrap();
    assert!(s.document().dimensions_consistent());

    s.resize_canvas(70, 20).unwrap();
    assert_eq!((s.document().width, s.document().height), (70, 20));
    assert!(s.document().dimensions_consistent());

    s.crop(5, 5, 30, 10).unwrap();
    assert!(s.document().dimensions_consistent());

    assert!(s.resize_canvas(2, 50).is_err());
    assert_eq!((s.document().width, s.document().height), (30, 10));

    while s.undo() {
        assert!(s.document().dimensions_consistent());
    }
    assert_eq!((s.document().width, s.document().height), (50, 40));
}

#[test]
fn history_keeps_thirty_steps() {
    let mut s = session_with(8, 8, CLEAR);
    for _ in 0..35 {
        s.add_layer();
    }
    assert_eq!(s.history().undo_count(), 30);
    let mut undone = 0;
    while s.undo() {
        undone += 1;
    }
    assert_eq!(undone, 30);
    // Five oldest checkpoints were evicted.
    assert_eq!(s.document().layers.len(), 6);
}

#[test]
fn bucket_fill_stays_inside_ring() {
    let mut s = session_with(20, 20, Rgba([255, 255, 255, 255]));
    s.set_tool(Tool::Pencil);
    s.set_brush_size(3.0);
    s.set_primary_color("#000000").unwrap();
    // Closed square outline from (5,5) to (14,14).
    s.pointer_down(5.0, 5.0, false);
    for &(x, y) in &[(14.0, 5.0), (14.0, 14.0), (5.0, 14.0), (5.0, 5.0)] {
        s.pointer_move(x, y);
    }
    s.pointer_up(5.0, 5.0);

    s.set_tool(Tool::Fill);
    s.set_primary_color("#ff0000").unwrap();
    click(&mut s, 10.0, 10.0);

    let px = &s.document().active_layer().pixels;
    assert_eq!(*px.get_pixel(10, 10), Rgba([255, 0, 0, 255]));
    assert_eq!(*px.get_pixel(5, 10), Rgba([0, 0, 0, 255]));
    assert_eq!(*px.get_pixel(1, 1), Rgba([255, 255, 255, 255]));
    assert_eq!(*px.get_pixel(18, 18), Rgba([255, 255, 255, 255]));
}

#[test]
fn half_blue_over_red_is_purple() {
    let mut s = session_with(4, 4, Rgba([255, 0, 0, 255]));
    let top = s.add_layer();
    s.set_primary_color("#0000ff").unwrap();
    s.set_tool(Tool::Fill);
    click(&mut s, 0.0, 0.0);
    s.set_layer_opacity(top, 0.5).unwrap();

    let out = s.flatten();
    let p = out.get_pixel(2, 2);
    assert!(close(p[0], 128) && p[1] == 0 && close(p[2], 128) && p[3] == 255, "got {:?}", p);
}

#[test]
fn opaque_normal_layer_occludes() {
    let mut s = session_with(6, 6, Rgba([10, 200, 30, 255]));
    let top = s.add_layer();
    s.set_primary_color("#123456").unwrap();
    s.set_tool(Tool::Fill);
    click(&mut s, 3.0, 3.0);
    assert!(s.flatten().pixels().all(|p| *p == Rgba([0x12, 0x34, 0x56, 255])));

    s.set_layer_visible(top, false).unwrap();
    assert!(s.flatten().pixels().all(|p| *p == Rgba([10, 200, 30, 255])));

    s.set_layer_visible(top, true).unwrap();
    s.set_layer_blend_mode(top, BlendMode::Multiply).unwrap();
    assert_ne!(*s.flatten().get_pixel(0, 0), Rgba([0x12, 0x34, 0x56, 255]));
}

#[test]
fn brush_footprint_matches_radius() {
    let mut s = session_with(100, 100, CLEAR);
    s.set_brush_size(24.0);
    s.set_brush_hardness(0.7);
    click(&mut s, 50.0, 50.0);

    let px = &s.document().active_layer().pixels;
    for y in 30..70u32 {
        for x in 30..70u32 {
            let d = ((x as f32 - 50.0).powi(2) + (y as f32 - 50.0).powi(2)).sqrt();
            let a = px.get_pixel(x, y)[3];
            if d < 12.0 {
                assert!(a > 0, "({}, {}) at distance {} is empty", x, y, d);
            } else if d >= 13.0 {
                assert_eq!(a, 0, "({}, {}) at distance {} was painted", x, y, d);
            }
        }
    }
}

#[test]
fn undo_after_fill_is_exact() {
    let mut s = session_with(32, 32, CLEAR);
    s.set_primary_color("#00ff00").unwrap();
    s.set_brush_size(6.0);
    s.pointer_down(3.0, 3.0, false);
    s.pointer_move(28.0, 28.0);
    s.pointer_up(28.0, 28.0);
    let before = s.document().active_layer().pixels.clone();

    s.set_tool(Tool::Fill);
    s.set_primary_color("#ff00ff").unwrap();
    click(&mut s, 30.0, 2.0);
    assert_ne!(s.document().active_layer().pixels, before);

    assert!(s.undo());
    assert_eq!(s.document().active_layer().pixels, before);
}

#[test]
fn failed_generation_adds_nothing() {
    let mut s = session_with(16, 16, CLEAR);
    let layers = s.document().layers.len();
    let steps = s.history().undo_count();

    let down = FixedGenerator(Err(EditorError::Generation("503 Service Unavailable".into())));
    assert!(s.generate_layer(&down, "a lighthouse").is_err());

    let garbage = FixedGenerator(Ok(b"not an image".to_vec()));
    assert!(matches!(s.generate_layer(&garbage, "a lighthouse"), Err(EditorError::Decode(_))));

    let ok = FixedGenerator(Ok(encode_png(&RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]))).unwrap()));
    assert!(s.generate_layer(&ok, "   ").is_err());

    assert_eq!(s.document().layers.len(), layers);
    assert_eq!(s.history().undo_count(), steps);

    let id = s.generate_layer(&ok, "a lighthouse").unwrap();
    assert_eq!(s.document().layers.len(), layers + 1);
    assert_eq!(s.active_layer_id(), id);
    assert_eq!(*s.document().active_layer().pixels.get_pixel(15, 15), Rgba([1, 2, 3, 255]));
}

#[test]
fn malformed_import_leaves_stack_alone() {
    let mut s = session_with(16, 16, CLEAR);
    assert!(s.import_raster_as_layer(&[0x89, b'P', b'N', b'G', 0, 0]).is_err());
    assert_eq!(s.document().layers.len(), 1);
    assert_eq!(s.history().undo_count(), 0);
}

#[test]
fn shortcuts_drive_tools_and_history() {
    let mut s = session_with(16, 16, CLEAR);
    assert_eq!(s.handle_shortcut(KeyCombo::key('e')), Some(BindableAction::ToolEraser));
    assert_eq!(s.tool(), Tool::Eraser);
    s.handle_shortcut(KeyCombo::key('W'));
    assert_eq!(s.tool(), Tool::MagicWand);
    s.handle_shortcut(KeyCombo::key('H'));
    assert_eq!(s.tool(), Tool::Pan);

    s.add_layer();
    assert_eq!(s.handle_shortcut(KeyCombo::ctrl_key('z')), Some(BindableAction::Undo));
    assert_eq!(s.document().layers.len(), 1);
    s.handle_shortcut(KeyCombo::ctrl_shift_key('z'));
    assert_eq!(s.document().layers.len(), 2);
    s.handle_shortcut(KeyCombo::ctrl_key('z'));
    s.handle_shortcut(KeyCombo::ctrl_key('y'));
    assert_eq!(s.document().layers.len(), 2);

    assert_eq!(s.handle_shortcut(KeyCombo::key('Q')), None);
}

#[test]
fn magic_wand_then_fill_is_confined() {
    let mut s = session_with(10, 10, Rgba([255, 255, 255, 255]));
    s.set_tool(Tool::RectangleSelect);
    s.pointer_down(0.0, 0.0, false);
    s.pointer_up(5.0, 10.0);
    s.set_tool(Tool::Fill);
    s.set_primary_color("#000000").unwrap();
    click(&mut s, 1.0, 1.0);

    s.deselect();
    s.set_tool(Tool::MagicWand);
    click(&mut s, 8.0, 8.0);
    let sel = s.document().selection.as_ref().unwrap();
    assert!(sel.contains(5, 0));
    assert!(!sel.contains(4, 0));
    assert_eq!(sel.selected_count(), 50);
}

#[test]
fn far_off_canvas_samples_are_clipped() {
    let mut s = session_with(32, 32, CLEAR);
    s.set_brush_size(4.0);
    s.pointer_down(5.0, 5.0, false);
    s.pointer_move(1e15, 5.0);
    s.pointer_move(-1e15, -1e15);
    s.pointer_up(-1e15, -1e15);

    let px = &s.document().active_layer().pixels;
    // The trail runs from the press point to the right edge and nowhere else.
    assert!((5..32).all(|x| px.get_pixel(x, 5)[3] > 0));
    assert_eq!(px.get_pixel(5, 20)[3], 0);
    assert!(s.document().dimensions_consistent());
    assert_eq!(s.history().undo_count(), 1);

    // Starting far away and dragging in paints from the edge inward.
    s.pointer_down(2e9, 20.0, false);
    s.pointer_up(10.0, 20.0);
    assert!((10..32).all(|x| s.document().active_layer().pixels.get_pixel(x, 20)[3] > 0));
}

#[test]
fn move_far_away_saturates_offset() {
    let mut s = session_with(8, 8, Rgba([1, 2, 3, 255]));
    s.set_tool(Tool::Move);
    s.pointer_down(0.0, 0.0, false);
    s.pointer_up(1e15, -1e15);
    let layer = s.document().active_layer();
    assert_eq!((layer.offset_x, layer.offset_y), (i32::MAX, i32::MIN));
    assert!(s.flatten().pixels().all(|p| p[3] == 0));
    assert!(s.undo());
    assert_eq!(s.document().active_layer().offset_x, 0);
}

#[test]
fn oversized_canvas_is_refused() {
    let mut s = session_with(16, 16, CLEAR);
    assert!(matches!(s.resize_canvas(20_000, 20_000), Err(EditorError::CanvasTooLarge { .. })));
    assert!(s.crop(0, 0, 40_000, 8).is_err());
    assert_eq!((s.document().width, s.document().height), (16, 16));
    assert!(s.document().dimensions_consistent());
    assert_eq!(s.history().undo_count(), 0);

    assert!(Document::new(0, 10, CLEAR).is_err());
    assert!(Document::new(32_769, 10, CLEAR).is_err());
    let settings = EditorSettings { default_width: 50_000, ..EditorSettings::default() };
    assert!(EditorSession::new(settings).is_err());

    let fresh = EditorSession::new(EditorSettings::default()).unwrap();
    assert_eq!((fresh.document().width, fresh.document().height), (800, 600));
    assert_eq!(*fresh.flatten().get_pixel(0, 0), Rgba([255, 255, 255, 255]));
}

#[test]
fn zero_tolerance_fill_changes_exactly_the_region() {
    let settings = EditorSettings { fill_tolerance: 0, ..EditorSettings::default() };
    let mut doc = Document::new(10, 10, Rgba([255, 255, 255, 255])).unwrap();
    let a = Rgba([200, 200, 200, 255]);
    let px = &mut doc.active_layer_mut().pixels;
    for (x, y) in [(1, 3), (2, 3), (3, 3), (4, 3), (5, 3), (1, 4), (1, 5)] {
        px.put_pixel(x, y, a);
    }
    // Same color but only diagonally adjacent, and a near miss.
    px.put_pixel(6, 4, a);
    px.put_pixel(2, 4, Rgba([201, 200, 200, 255]));

    let mut s = EditorSession::with_document(doc, settings);
    let before = s.flatten();
    s.set_tool(Tool::Fill);
    s.set_primary_color("#ff0000").unwrap();
    click(&mut s, 3.0, 3.0);
    let after = s.flatten();

    let changed = before.pixels().zip(after.pixels()).filter(|(a, b)| a != b).count();
    assert_eq!(changed, 7);
    assert_eq!(*after.get_pixel(1, 5), Rgba([255, 0, 0, 255]));
    assert_eq!(*after.get_pixel(6, 4), a);
    assert_eq!(*after.get_pixel(2, 4), Rgba([201, 200, 200, 255]));
}

#[test]
fn lasso_selects_the_drawn_polygon() {
    let mut s = session_with(20, 20, Rgba([255, 255, 255, 255]));
    s.set_tool(Tool::Lasso);
    s.pointer_down(2.0, 2.0, false);
    s.pointer_move(17.0, 2.0);
    s.pointer_move(17.0, 17.0);
    s.pointer_up(2.0, 17.0);

    let sel = s.document().selection.as_ref().unwrap();
    assert_eq!(sel.selected_count(), 225);
    assert!(sel.contains(2, 2) && sel.contains(16, 16));
    assert!(!sel.contains(17, 17) && !sel.contains(1, 5));
    assert_eq!(
        sel.outline,
        SelectionOutline::Polygon(vec![(2.0, 2.0), (17.0, 2.0), (17.0, 17.0), (2.0, 17.0)])
    );

    // Painting is confined to the lasso.
    s.set_tool(Tool::Pencil);
    s.set_primary_color("#000000").unwrap();
    s.set_brush_size(10.0);
    click(&mut s, 2.0, 10.0);
    let px = &s.document().active_layer().pixels;
    assert_eq!(*px.get_pixel(2, 10), Rgba([0, 0, 0, 255]));
    assert_eq!(*px.get_pixel(1, 10), Rgba([255, 255, 255, 255]));

    // Too few points clears.
    s.set_tool(Tool::Lasso);
    s.pointer_down(1.0, 1.0, false);
    s.pointer_up(5.0, 5.0);
    assert!(s.document().selection.is_none());
}

#[test]
fn ellipse_marquee_is_inscribed() {
    let mut s = session_with(20, 20, CLEAR);
    s.set_tool(Tool::EllipseSelect);
    s.pointer_down(0.0, 0.0, false);
    s.pointer_up(20.0, 10.0);

    let sel = s.document().selection.as_ref().unwrap();
    assert!(sel.contains(10, 5));
    assert!(!sel.contains(0, 0) && !sel.contains(19, 0) && !sel.contains(10, 12));
    let n = sel.selected_count();
    assert!((140..=170).contains(&n), "{} pixels selected", n);
    assert_eq!(sel.outline, SelectionOutline::Rect { min_x: 0, min_y: 0, max_x: 20, max_y: 10 });
}

#[test]
fn ellipse_shape_outline_leaves_center_empty() {
    let mut s = session_with(30, 30, CLEAR);
    s.set_tool(Tool::EllipseShape);
    s.tool_properties_mut().shape_fill = ShapeFillMode::Outline;
    assert_eq!(s.tool_properties().shape_fill, ShapeFillMode::Outline);
    s.pointer_down(5.0, 5.0, false);
    s.pointer_move(15.0, 15.0);
    // Nothing is drawn until release.
    assert_eq!(s.document().active_layer().pixels.get_pixel(15, 5)[3], 0);
    s.pointer_up(25.0, 25.0);

    let px = &s.document().active_layer().pixels;
    assert_eq!(px.get_pixel(15, 15)[3], 0);
    assert!(px.get_pixel(15, 5)[3] > 0);
    assert_eq!(px.get_pixel(2, 2)[3], 0);
    assert_eq!(s.history().undo_count(), 1);

    s.tool_properties_mut().shape_fill = ShapeFillMode::Filled;
    s.pointer_down(5.0, 5.0, false);
    s.pointer_up(25.0, 25.0);
    assert_eq!(s.document().active_layer().pixels.get_pixel(15, 15)[3], 255);
}

#[test]
fn eraser_clears_alpha_and_undoes() {
    let mut s = session_with(10, 10, Rgba([255, 0, 0, 255]));
    s.set_tool(Tool::Eraser);
    s.set_brush_size(4.0);
    s.set_brush_hardness(1.0);
    click(&mut s, 5.0, 5.0);

    let px = &s.document().active_layer().pixels;
    assert_eq!(px.get_pixel(5, 5)[3], 0);
    assert_eq!(*px.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
    assert!(s.undo());
    assert_eq!(*s.document().active_layer().pixels.get_pixel(5, 5), Rgba([255, 0, 0, 255]));
}

#[test]
fn text_tool_draws_with_primary_color() {
    let font = ["/usr/share/fonts/**/*.ttf", "/System/Library/Fonts/**/*.ttf", "C:/Windows/Fonts/*.ttf"]
        .iter()
        .filter_map(|pattern| glob::glob(pattern).ok())
        .flat_map(|paths| paths.flatten())
        .find_map(|path| font_from_bytes(std::fs::read(path).ok()?).ok());
    let Some(font) = font else {
        eprintln!("no TrueType font installed, skipping");
        return;
    };

    let mut s = session_with(120, 60, CLEAR);
    s.set_font(font);
    s.set_primary_color("#102030").unwrap();
    assert!(s.insert_text(4.0, 6.0, "Wg").unwrap());

    let img = s.flatten();
    let inked: Vec<(u32, u32)> = img
        .enumerate_pixels()
        .filter(|(_, _, p)| p[3] > 0)
        .map(|(x, y, _)| (x, y))
        .collect();
    assert!(!inked.is_empty());
    assert!(inked.iter().all(|&(x, y)| x >= 4 && y >= 6));
    assert!(img.pixels().filter(|p| p[3] == 255).all(|p| *p == Rgba([0x10, 0x20, 0x30, 255])));

    assert!(!s.insert_text(4.0, 6.0, "").unwrap());
    assert!(s.undo());
    assert!(s.flatten().pixels().all(|p| p[3] == 0));
}

#[test]
fn color_and_selection_shortcuts() {
    let mut s = session_with(12, 12, CLEAR);
    s.set_primary_color("#ff0000").unwrap();
    s.set_secondary_color("#00ff00").unwrap();
    assert_eq!(s.handle_shortcut(KeyCombo::key('x')), Some(BindableAction::SwapColors));
    assert_eq!(s.primary_color(), Rgba([0, 255, 0, 255]));
    assert_eq!(s.secondary_color(), Rgba([255, 0, 0, 255]));

    s.handle_shortcut(KeyCombo::ctrl_key('a'));
    assert_eq!(s.document().selection.as_ref().unwrap().selected_count(), 144);
    s.handle_shortcut(KeyCombo::ctrl_key('d'));
    assert!(s.document().selection.is_none());
    assert!(s.undo());
    assert!(s.document().selection.is_some());

    // View tools never touch the document.
    s.handle_shortcut(KeyCombo::key('z'));
    assert_eq!(s.tool(), Tool::Zoom);
    let steps = s.history().undo_count();
    click(&mut s, 3.0, 3.0);
    assert_eq!(s.history().undo_count(), steps);
    assert!(s.flatten().pixels().all(|p| p[3] == 0));
}
