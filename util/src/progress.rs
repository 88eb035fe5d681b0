
use std::borrow::Cow;
use std::io::{Stdout, Write};
use std::time::Duration;

use pbr::ProgressBar;

use na_inv::IterationSummary;

/// A terminal progress bar over inversion iterations. The message tracks
/// the latest iteration and its mean member error.
pub struct IterationProgress<W = Stdout>
  where W: Write,
{
  name: Cow<'static, str>,
  progress: ProgressBar<W>,
  recorded: usize,
}
impl IterationProgress<Stdout> {
  pub fn new(iterations: usize, name: Cow<'static, str>) -> IterationProgress<Stdout> {
    IterationProgress::setup(ProgressBar::new(iterations as _), name)
  }
}
impl<W> IterationProgress<W>
  where W: Write,
{
  pub fn on(handle: W, iterations: usize, name: Cow<'static, str>) -> IterationProgress<W> {
    IterationProgress::setup(ProgressBar::on(handle, iterations as _), name)
  }

  fn setup(mut p: ProgressBar<W>, name: Cow<'static, str>) -> IterationProgress<W> {
    p.show_speed = false;
    p.show_percent = true;
    p.show_counter = true;
    p.show_time_left = true;

    let fps = Duration::new(1, 0) / 60;
    p.set_max_refresh_rate(Some(fps));

    let msg = format!("{}: ", name);
    p.message(&msg[..]);
    IterationProgress {
      name,
      progress: p,
      recorded: 0,
    }
  }

  pub fn record(&mut self, summary: &IterationSummary) {
    let msg = format!("{}: iteration {} mse {:.3e} ",
                      self.name, summary.iteration,
                      summary.mean_of_mean_square_errors());
    self.progress.message(&msg[..]);
    self.progress.inc();
    self.recorded += 1;
  }

  /// Number of summaries recorded so far.
  pub fn recorded(&self) -> usize { self.recorded }

  pub fn finish(mut self) {
    let msg = format!("{} done after {} iterations!\n", self.name, self.recorded);
    self.progress.finish_println(&msg);
  }
}
