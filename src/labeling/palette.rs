/// Colors handed out to new labels, in order.
const COLORS: &[&str] = &[
    "#ff3b30", "#34c759", "#007aff", "#ff9500", "#af52de", "#ffcc00", "#5ac8fa", "#ff2d55",
];

/// Cycles through a fixed set of box colors.
#[derive(Clone, Debug, Default)]
pub struct LabelPalette {
    next: usize,
}

impl LabelPalette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_color(&mut self) -> &'static str {
        let color = COLORS[self.next % COLORS.len()];
        self.next = (self.next + 1) % COLORS.len();
        color
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}
