//! Resize negotiation timers.
//!
//! Geometry is only trustworthy once the surface has finished laying out, so
//! resizes are computed rather than forwarded: a trigger (settle delay,
//! layout change, debounce) asks for a measurement, the measurement waits
//! for [`TerminalSurface::layout_stable`], and only then is the size read.
//!
//! All timers are futures owned by the scheduler. Dropping or cancelling the
//! scheduler cancels them; nothing fires after teardown.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use devbox_core::{LayoutEvent, TerminalSurface, Timings};
use futures::future::{BoxFuture, poll_fn};
use tokio::time::{Sleep, sleep};

/// What the scheduler is asking its owner to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeTick {
    /// The post-connect settle delay elapsed.
    SettleElapsed,
    /// The trailing window-resize retry elapsed.
    DebounceElapsed,
    /// Layout is stable; read the geometry and send it.
    LayoutStable,
}

/// Timers and the pending measurement for one console session.
pub struct ResizeScheduler {
    timings: Timings,
    settle: Option<Pin<Box<Sleep>>>,
    debounce: Option<Pin<Box<Sleep>>>,
    measuring: Option<BoxFuture<'static, ()>>,
}

impl ResizeScheduler {
    #[must_use]
    pub const fn new(timings: Timings) -> Self {
        Self {
            timings,
            settle: None,
            debounce: None,
            measuring: None,
        }
    }

    /// Arm the settle delay that precedes the first resize.
    pub fn on_connected(&mut self) {
        self.settle = Some(Box::pin(sleep(self.timings.settle_delay())));
    }

    /// React to a layout change.
    ///
    /// Window resizes also (re)arm the trailing debounce so the size after a
    /// burst of resize events is captured.
    pub fn on_layout(&mut self, event: LayoutEvent, surface: &dyn TerminalSurface) {
        self.request_measure(surface);
        if event == LayoutEvent::WindowResized {
            self.debounce = Some(Box::pin(sleep(self.timings.resize_debounce())));
        }
    }

    /// Ask for a measurement once layout is stable.
    ///
    /// Requests coalesce: while a measurement is pending, further requests
    /// are satisfied by it. Resize is "set current size", so one read after
    /// the layout settles covers every trigger that came before it.
    pub fn request_measure(&mut self, surface: &dyn TerminalSurface) {
        if self.measuring.is_none() {
            self.measuring = Some(surface.layout_stable());
        }
    }

    /// Whether any timer or measurement is outstanding.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.settle.is_none() && self.debounce.is_none() && self.measuring.is_none()
    }

    /// Drop every timer and pending measurement.
    pub fn cancel(&mut self) {
        self.settle = None;
        self.debounce = None;
        self.measuring = None;
    }

    /// Wait for the next tick. Pending forever while idle.
    pub async fn next(&mut self) -> ResizeTick {
        poll_fn(|cx| self.poll_tick(cx)).await
    }

    fn poll_tick(&mut self, cx: &mut Context<'_>) -> Poll<ResizeTick> {
        if fire(&mut self.settle, cx) {
            return Poll::Ready(ResizeTick::SettleElapsed);
        }
        if fire(&mut self.debounce, cx) {
            return Poll::Ready(ResizeTick::DebounceElapsed);
        }
        if fire(&mut self.measuring, cx) {
            return Poll::Ready(ResizeTick::LayoutStable);
        }
        Poll::Pending
    }
}

/// Poll an optional one-shot future, clearing it once it completes.
fn fire<F>(slot: &mut Option<Pin<Box<F>>>, cx: &mut Context<'_>) -> bool
where
    F: Future<Output = ()> + ?Sized,
{
    let Some(fut) = slot.as_mut() else {
        return false;
    };
    if fut.as_mut().poll(cx).is_ready() {
        *slot = None;
        true
    } else {
        false
    }
}
