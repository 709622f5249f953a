use std::collections::VecDeque;

use uartscope_decode::{Dot, TimeSpan};

use crate::session::SampleBatch;

pub const DEFAULT_SCOPE_POINTS: usize = 50_000;

/// Frames shown in the default view.
const VISIBLE_FRAMES: u32 = 5;

/// Rolling waveform history fed from sample batches.
pub struct ScopeHistory {
    times: VecDeque<f64>,
    levels: VecDeque<u8>,
    dots: VecDeque<Dot>,
    max_points: usize,
}

impl Default for ScopeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE_POINTS)
    }
}

impl ScopeHistory {
    pub fn new(max_points: usize) -> Self {
        Self {
            times: VecDeque::new(),
            levels: VecDeque::new(),
            dots: VecDeque::new(),
            max_points,
        }
    }

    pub fn push_batch(&mut self, batch: &SampleBatch) {
        self.times.extend(&batch.times);
        self.levels.extend(&batch.levels);
        self.dots.extend(&batch.dots);

        let excess = self.times.len().saturating_sub(self.max_points);
        if excess > 0 {
            self.times.drain(..excess);
            self.levels.drain(..excess);
            self.dots.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn clear(&mut self) {
        self.times.clear();
        self.levels.clear();
        self.dots.clear();
    }

    pub fn latest_time(&self) -> Option<f64> {
        self.times.back().copied()
    }

    /// Window covering the last five 10-bit frames at `baud`.
    pub fn visible_span(&self, baud: f64) -> Option<TimeSpan> {
        self.latest_time()
            .map(|end| TimeSpan::frames_ending_at(end, baud, VISIBLE_FRAMES))
    }

    /// `(time, level, dot)` for every retained point inside `span`.
    pub fn points_in(&self, span: TimeSpan) -> impl Iterator<Item = (f64, u8, Dot)> + '_ {
        self.times
            .iter()
            .zip(&self.levels)
            .zip(&self.dots)
            .filter(move |((t, _), _)| span.contains(**t))
            .map(|((t, l), d)| (*t, *l, *d))
    }

    /// Renders `span` as a two-row text trace, one column per sample, with
    /// receiver decisions marked underneath.
    pub fn render(&self, span: TimeSpan) -> String {
        let mut line = String::new();
        let mut marks = String::new();
        for (_, level, dot) in self.points_in(span) {
            line.push(if level == 1 { '‾' } else { '_' });
            marks.push(match dot {
                Dot::None => ' ',
                Dot::Start => 'S',
                Dot::Data => 'd',
                Dot::Parity => 'p',
                Dot::Stop => 'T',
                Dot::Error => '!',
            });
        }
        format!("{line}\n{}", marks.trim_end())
    }
}
