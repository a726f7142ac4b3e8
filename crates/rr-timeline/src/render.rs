//! Presence timeline chart.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::RenderError;
use crate::color::{Rgba, main_color, palette_color};
use crate::layout::{Geometry, Layout};
use crate::png;
use crate::raster::{Canvas, Raster, Rect, TEXT_SCALE};
use crate::ticks::{Tick, TickWeight, choose_ticks};

const BACKGROUND: Rgba = Rgba::WHITE;
const LABEL: Rgba = Rgba::rgb(66, 66, 66);
const PRIMARY_GRID: Rgba = Rgba::rgb(200, 200, 200);
const SECONDARY_GRID: Rgba = Rgba::rgb(100, 100, 100);
const FRAME_LINE: Rgba = Rgba::rgb(0, 105, 92);
const NOW_LINE: Rgba = Rgba::rgb(220, 50, 47);
const STREAM_ACCENT: Rgba = Rgba::rgb(88, 101, 242);

const STREAM_THICKNESS: f64 = 6.0;
const STREAM_GAP: f64 = 2.0;
const AVATAR_MARGIN: f64 = 3.0;
/// Gap between the chart top and the primary tick labels.
const LABEL_GAP: f64 = 5.0;

/// How prominently a presence interval is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emphasis {
    #[default]
    Unmuted,
    Muted,
    MutedDeafened,
}

impl Emphasis {
    /// Deafening implies muting, so `deaf` alone maps to [`Emphasis::MutedDeafened`].
    pub const fn from_flags(mute: bool, deaf: bool) -> Self {
        match (mute, deaf) {
            (_, true) => Self::MutedDeafened,
            (true, false) => Self::Muted,
            (false, false) => Self::Unmuted,
        }
    }

    pub const fn alpha(self) -> u8 {
        match self {
            Self::Unmuted => 255,
            Self::Muted => 160,
            Self::MutedDeafened => 90,
        }
    }
}

/// A time range; `end: None` is still open and is drawn up to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSection {
    pub section: Section,
    pub emphasis: Emphasis,
}

/// One participant row.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    /// Seeds the fallback colour when there is neither avatar nor colour.
    pub key: u64,
    pub avatar: Option<Raster>,
    pub color: Option<Rgba>,
    pub presence: Vec<PresenceSection>,
    pub streaming: Vec<Section>,
}

impl Entry {
    pub fn new(key: u64) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_avatar(mut self, avatar: Option<Raster>) -> Self {
        self.avatar = avatar;
        self
    }

    #[must_use]
    pub const fn with_color(mut self, color: Option<Rgba>) -> Self {
        self.color = color;
        self
    }

    pub fn add_presence(
        &mut self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        emphasis: Emphasis,
    ) -> &mut Self {
        self.presence.push(PresenceSection {
            section: Section { start, end },
            emphasis,
        });
        self
    }

    pub fn add_streaming(&mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> &mut Self {
        self.streaming.push(Section { start, end });
        self
    }

    /// Explicit colour, else the avatar's main colour, else a palette colour.
    pub fn bar_color(&self) -> Rgba {
        self.color
            .or_else(|| self.avatar.as_ref().map(main_color))
            .unwrap_or_else(|| palette_color(self.key))
    }
}

/// Everything needed to draw one chart. Rendering reads no clock.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub start: DateTime<Utc>,
    pub frame_end: DateTime<Utc>,
    /// Open intervals end here.
    pub now: DateTime<Utc>,
    /// Offset used to align ticks and format labels.
    pub utc_offset: FixedOffset,
    pub entries: Vec<Entry>,
    pub now_indicator: bool,
    pub layout: Layout,
    /// Overrides the automatic (primary, secondary) tick spacing.
    pub ticks: Option<(Duration, Duration)>,
}

impl Timeline {
    pub fn new(start: DateTime<Utc>, frame_end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            start,
            frame_end,
            now,
            utc_offset: Utc.fix(),
            entries: Vec::new(),
            now_indicator: false,
            layout: Layout::default(),
            ticks: None,
        }
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    #[must_use]
    pub const fn with_now_indicator(mut self, enabled: bool) -> Self {
        self.now_indicator = enabled;
        self
    }

    #[must_use]
    pub const fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn span(&self) -> Duration {
        self.frame_end - self.start
    }

    pub fn geometry(&self) -> Geometry {
        self.layout.geometry(self.entries.len())
    }

    pub fn tick_spacing(&self) -> (Tick, Tick) {
        match self.ticks {
            Some((primary, secondary)) => (
                Tick::new(primary, TickWeight::Primary),
                Tick::new(secondary, TickWeight::Secondary),
            ),
            None => choose_ticks(self.span()),
        }
    }

    /// Draws the chart onto `canvas`, which must be at least `geometry()` in size.
    pub fn draw<C: Canvas + ?Sized>(&self, canvas: &mut C) -> Result<Geometry, RenderError> {
        if self.frame_end < self.start {
            return Err(RenderError::InvalidFrame {
                start: self.start,
                frame_end: self.frame_end,
            });
        }
        let geometry = self.geometry();
        canvas.fill_rect(
            Rect::new(
                0.0,
                0.0,
                f64::from(geometry.width),
                f64::from(geometry.height),
            ),
            BACKGROUND,
        );

        self.draw_ticks(canvas, &geometry);
        for (row, entry) in self.entries.iter().enumerate() {
            self.draw_entry(canvas, &geometry, row, entry);
        }

        let area = geometry.timeline;
        canvas.vline(area.x, area.y, area.bottom(), FRAME_LINE);
        canvas.vline(area.right(), area.y, area.bottom(), FRAME_LINE);

        if self.now_indicator && self.start <= self.now && self.now <= self.frame_end {
            let x = geometry.x_at(self.fraction(self.now));
            canvas.vline(x, area.y, area.bottom(), NOW_LINE);
        }
        Ok(geometry)
    }

    pub fn render(&self) -> Result<Raster, RenderError> {
        let geometry = self.geometry();
        let mut raster = Raster::new(geometry.width, geometry.height, BACKGROUND);
        self.draw(&mut raster)?;
        tracing::debug!(
            width = geometry.width,
            height = geometry.height,
            rows = self.entries.len(),
            "rendered timeline"
        );
        Ok(raster)
    }

    pub fn render_png(&self) -> Result<Vec<u8>, RenderError> {
        png::encode(&self.render()?)
    }

    fn fraction(&self, at: DateTime<Utc>) -> f64 {
        let span = self.span().num_milliseconds();
        if span <= 0 {
            return 0.0;
        }
        (at - self.start).num_milliseconds() as f64 / span as f64
    }

    fn draw_ticks<C: Canvas + ?Sized>(&self, canvas: &mut C, geometry: &Geometry) {
        let area = geometry.timeline;
        let label_height = f64::from(crate::glyph::GLYPH_HEIGHT * TEXT_SCALE);
        let (primary, secondary) = self.tick_spacing();

        for (line, tick) in [primary, secondary].into_iter().enumerate() {
            let color = match tick.weight {
                TickWeight::Primary => PRIMARY_GRID,
                TickWeight::Secondary => SECONDARY_GRID,
            };
            let label_y = area.y - LABEL_GAP - line as f64 * (label_height + LABEL_GAP);
            for at in tick.positions(self.start, self.frame_end, self.utc_offset) {
                let x = geometry.x_at(self.fraction(at));
                let label = at
                    .with_timezone(&self.utc_offset)
                    .format(tick.label_format)
                    .to_string();
                canvas.text(&label, x, label_y, LABEL);
                canvas.vline(x, area.y, area.bottom(), color);
            }
        }
    }

    fn draw_entry<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        geometry: &Geometry,
        row: usize,
        entry: &Entry,
    ) {
        let color = entry.bar_color();

        let head = geometry.headline_cell(row);
        let (cx, cy) = (head.x + head.w / 2.0, head.y + head.h / 2.0);
        let radius = (head.w.min(head.h) / 2.0 - AVATAR_MARGIN).max(0.0);
        match &entry.avatar {
            Some(avatar) => canvas.image_circle(avatar, cx, cy, radius),
            None => canvas.fill_circle(cx, cy, radius, color),
        }

        let cell = geometry.timeline_cell(row);
        let bar_top = cell.y + (cell.h - geometry.bar_thickness) / 2.0;
        for presence in &entry.presence {
            let rect = self.section_rect(geometry, presence.section, bar_top, geometry.bar_thickness);
            if let Some(rect) = rect {
                canvas.fill_rect(rect, color.with_alpha(presence.emphasis.alpha()));
            }
        }

        let stream_top = bar_top + geometry.bar_thickness + STREAM_GAP;
        for &section in &entry.streaming {
            let rect = self.section_rect(geometry, section, stream_top, STREAM_THICKNESS);
            if let Some(rect) = rect {
                canvas.fill_rect(rect, STREAM_ACCENT);
            }
        }
    }

    fn section_rect(
        &self,
        geometry: &Geometry,
        section: Section,
        top: f64,
        height: f64,
    ) -> Option<Rect> {
        let end = section.end.unwrap_or(self.now).max(section.start);
        let x0 = geometry.x_at(self.fraction(section.start));
        let x1 = geometry.x_at(self.fraction(end));
        (x1 > x0).then(|| Rect::new(x0, top, x1 - x0, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Rect(Rect, Rgba),
        Line(f64, Rgba),
        Text(String, f64, f64),
        Circle(f64, f64),
        Avatar(f64, f64),
    }

    #[derive(Default)]
    struct Recorder(Vec<Op>);

    impl Canvas for Recorder {
        fn fill_rect(&mut self, rect: Rect, color: Rgba) {
            self.0.push(Op::Rect(rect, color));
        }
        fn vline(&mut self, x: f64, _top: f64, _bottom: f64, color: Rgba) {
            self.0.push(Op::Line(x, color));
        }
        fn text(&mut self, text: &str, x: f64, y: f64, _color: Rgba) {
            self.0.push(Op::Text(text.to_string(), x, y));
        }
        fn fill_circle(&mut self, cx: f64, cy: f64, _radius: f64, _color: Rgba) {
            self.0.push(Op::Circle(cx, cy));
        }
        fn image_circle(&mut self, _image: &Raster, cx: f64, cy: f64, _radius: f64) {
            self.0.push(Op::Avatar(cx, cy));
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0)
            .single()
            .expect("valid test timestamp")
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        base() + Duration::minutes(minutes)
    }

    fn two_rows() -> Timeline {
        let mut timeline = Timeline::new(at(0), at(30), at(30));
        let mut first = Entry::new(1);
        first
            .add_presence(at(0), Some(at(10)), Emphasis::Unmuted)
            .add_presence(at(20), Some(at(30)), Emphasis::Unmuted);
        let mut second = Entry::new(2);
        second.add_presence(at(5), Some(at(25)), Emphasis::Muted);
        timeline.push(first);
        timeline.push(second);
        timeline
    }

    fn bars(ops: &[Op]) -> Vec<(Rect, Rgba)> {
        ops.iter()
            .filter_map(|op| match op {
                Op::Rect(rect, color) if rect.h < 70.0 => Some((*rect, *color)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn two_participants_render_two_rows() {
        let mut recorder = Recorder::default();
        two_rows().draw(&mut recorder).unwrap();

        let bars = bars(&recorder.0);
        assert_eq!(bars.len(), 3);
        let mut rows: Vec<_> = bars.iter().map(|(r, _)| r.y).collect();
        rows.dedup();
        assert_eq!(rows, vec![65.0, 135.0]);

        // [[0,10],[20,30]] of 30 across 900px
        assert_eq!(bars[0].0.x, 110.0);
        assert_eq!(bars[0].0.w, 300.0);
        assert_eq!(bars[1].0.x, 710.0);
        assert_eq!(bars[2].0.x, 260.0);
        assert_eq!(bars[2].0.w, 600.0);
        assert_eq!(bars[2].1.a, Emphasis::Muted.alpha());

        let avatars = recorder.0.iter().filter(|op| matches!(op, Op::Circle(..))).count();
        assert_eq!(avatars, 2);
    }

    #[test]
    fn ninety_minute_span_draws_nine_primary_gridlines() {
        let timeline = Timeline::new(at(0), at(90), at(90));
        let mut recorder = Recorder::default();
        timeline.draw(&mut recorder).unwrap();

        let primary = recorder
            .0
            .iter()
            .filter(|op| matches!(op, Op::Line(_, c) if *c == PRIMARY_GRID))
            .count();
        assert_eq!(primary, 9);

        let labels: Vec<_> = recorder
            .0
            .iter()
            .filter_map(|op| match op {
                Op::Text(text, _, _) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        insta::assert_snapshot!(
            labels.join(" "),
            @"20:00 20:10 20:20 20:30 20:40 20:50 21:00 21:10 21:20"
        );
    }

    #[test]
    fn labels_use_local_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3_600).unwrap();
        let timeline = Timeline::new(at(0), at(30), at(30)).with_offset(tokyo);
        let mut recorder = Recorder::default();
        timeline.draw(&mut recorder).unwrap();
        assert!(recorder.0.contains(&Op::Text("05:00".to_string(), 110.0, 35.0)));
    }

    #[test]
    fn open_sections_end_at_now() {
        let mut timeline = Timeline::new(at(0), at(60), at(15));
        let mut entry = Entry::new(1);
        entry.add_presence(at(0), None, Emphasis::Unmuted);
        entry.add_streaming(at(5), None);
        timeline.push(entry);

        let mut recorder = Recorder::default();
        timeline.draw(&mut recorder).unwrap();
        let bars = bars(&recorder.0);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].0.w, 225.0);
        assert_eq!(bars[1].1, STREAM_ACCENT);
        assert!(bars[1].0.y > bars[0].0.y);
    }

    #[test]
    fn now_indicator_is_opt_in() {
        let count = |timeline: &Timeline| {
            let mut recorder = Recorder::default();
            timeline.draw(&mut recorder).unwrap();
            recorder
                .0
                .iter()
                .filter(|op| matches!(op, Op::Line(_, c) if *c == NOW_LINE))
                .count()
        };
        let timeline = Timeline::new(at(0), at(60), at(15));
        assert_eq!(count(&timeline), 0);
        assert_eq!(count(&timeline.with_now_indicator(true)), 1);
    }

    #[test]
    fn zero_participants_still_render() {
        let png = Timeline::new(at(0), at(30), at(30)).render_png().unwrap();
        let raster = png::decode(&png).unwrap();
        assert_eq!((raster.width(), raster.height()), (1040, 50));
    }

    #[test]
    fn zero_span_renders_single_tick() {
        let timeline = Timeline::new(at(0), at(0), at(0));
        let mut recorder = Recorder::default();
        timeline.draw(&mut recorder).unwrap();
        let labels = recorder.0.iter().filter(|op| matches!(op, Op::Text(..))).count();
        // one synthetic tick per row of labels
        assert_eq!(labels, 2);
    }

    #[test]
    fn frame_before_start_is_rejected() {
        let err = Timeline::new(at(10), at(0), at(10)).render().unwrap_err();
        assert!(matches!(err, RenderError::InvalidFrame { .. }));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = two_rows().render_png().unwrap();
        let b = two_rows().render_png().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn emphasis_from_flags() {
        assert_eq!(Emphasis::from_flags(false, false), Emphasis::Unmuted);
        assert_eq!(Emphasis::from_flags(true, false), Emphasis::Muted);
        assert_eq!(Emphasis::from_flags(true, true), Emphasis::MutedDeafened);
        assert_eq!(Emphasis::from_flags(false, true), Emphasis::MutedDeafened);
        assert!(Emphasis::Unmuted.alpha() > Emphasis::Muted.alpha());
        assert!(Emphasis::Muted.alpha() > Emphasis::MutedDeafened.alpha());
    }
}
