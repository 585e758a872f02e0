// src/scheduler/pipeline.rs

//! Three-slot buffer pipeline: `pending` → `flipped` → `presented`.
//!
//! `pending` holds the buffer a flip was requested for, `flipped` the buffer
//! most recently put on screen, and `presented` the one shown before it.
//! Slots own their buffers, so a buffer can only ever sit in one slot. Moves
//! are strictly forward; a buffer leaves through `advance` (the old
//! `presented` becomes releasable), `take_pending` (a superseded request) or
//! `drain` at teardown.

#[derive(Debug)]
pub struct FlipPipeline<B> {
    pending: Option<B>,
    flipped: Option<B>,
    presented: Option<B>,
}

impl<B> Default for FlipPipeline<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> FlipPipeline<B> {
    pub fn new() -> Self {
        Self {
            pending: None,
            flipped: None,
            presented: None,
        }
    }

    /// `locked → pending`. Hands the buffer back if a flip is already pending.
    pub fn queue(&mut self, buffer: B) -> Result<(), B> {
        if self.pending.is_some() {
            return Err(buffer);
        }
        self.pending = Some(buffer);
        Ok(())
    }

    /// Moves every slot one step once the pending buffer is on screen:
    /// `pending → flipped → presented`. Returns the previously presented
    /// buffer, which is now releasable. A no-op when nothing is pending.
    pub fn advance(&mut self) -> Option<B> {
        let next = self.pending.take()?;
        let released = self.presented.take();
        self.presented = self.flipped.replace(next);
        released
    }

    /// Queues and advances in one step, for synchronous presentation.
    pub fn present_immediately(&mut self, buffer: B) -> Result<Option<B>, B> {
        self.queue(buffer)?;
        Ok(self.advance())
    }

    /// Withdraws a pending buffer that was never confirmed on screen.
    pub fn take_pending(&mut self) -> Option<B> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&B> {
        self.pending.as_ref()
    }

    pub fn flipped(&self) -> Option<&B> {
        self.flipped.as_ref()
    }

    pub fn presented(&self) -> Option<&B> {
        self.presented.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_none() && self.flipped.is_none() && self.presented.is_none()
    }

    /// Empties every slot, oldest first.
    pub fn drain(&mut self) -> Vec<B> {
        [self.presented.take(), self.flipped.take(), self.pending.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}
