//! Coalesces fragment runs into complete samples.
//!
//! Decoders may emit several partial samples for one physical instant, for
//! example when a device writes position and sensor channels as separate
//! records. The accumulator groups consecutive fragments that share a
//! timestamp and merges them with a first-value-wins rule before anything
//! downstream sees the sample.

use std::mem;

use crate::types::Sample;

/// Builder for one sample, owned for exactly the lifetime of that sample.
///
/// A fresh builder opens per timestamp; nothing is shared across samples,
/// so a fragment can never leak a value into a neighboring instant.
#[derive(Debug)]
pub struct SampleBuilder {
    sample: Sample,
}

impl SampleBuilder {
    /// Open a builder for the given instant.
    pub fn begin(absolute_time: i64) -> Self {
        Self { sample: Sample::at(absolute_time) }
    }

    /// Fold a fragment into the sample. The first non-absent value for each
    /// field wins; later fragments only fill gaps.
    pub fn apply(&mut self, fragment: &Sample) {
        self.sample.merge_missing_from(fragment);
    }

    /// Close the builder, yielding the completed sample.
    pub fn end(self) -> Sample {
        self.sample
    }

    fn time(&self) -> i64 {
        self.sample.absolute_time
    }
}

/// Streaming accumulator over a decoder's fragment sequence.
///
/// Feed fragments in arrival order with [`push`](Self::push); a completed
/// sample comes back as soon as a fragment for a different instant arrives.
/// Call [`finish`](Self::finish) at end of stream to flush the final one.
#[derive(Debug, Default)]
pub struct Accumulator {
    current: Option<SampleBuilder>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb the next fragment. Returns the previous sample when this
    /// fragment opens a new instant.
    pub fn push(&mut self, fragment: Sample) -> Option<Sample> {
        match &mut self.current {
            Some(builder) if builder.time() == fragment.absolute_time => {
                builder.apply(&fragment);
                None
            }
            Some(_) => {
                let mut opened = SampleBuilder::begin(fragment.absolute_time);
                opened.apply(&fragment);
                let finished = mem::replace(&mut self.current, Some(opened));
                finished.map(SampleBuilder::end)
            }
            None => {
                let mut opened = SampleBuilder::begin(fragment.absolute_time);
                opened.apply(&fragment);
                self.current = Some(opened);
                None
            }
        }
    }

    /// Flush the in-progress sample at end of stream.
    pub fn finish(self) -> Option<Sample> {
        self.current.map(SampleBuilder::end)
    }
}
