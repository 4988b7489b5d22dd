use anyhow::Result;
use cellstack_core::stack::LoadProgress;
use indicatif::{ProgressBar, ProgressStyle};

/// Page progress bar for stack loading.
pub struct BarProgress {
    pb: ProgressBar,
}

impl BarProgress {
    pub fn new(message: &str) -> Result<Self> {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40}] {pos}/{len}")?
                .progress_chars("=> "),
        );
        pb.set_message(message.to_string());
        Ok(Self { pb })
    }
}

impl LoadProgress for BarProgress {
    fn begin(&self, total_pages: usize) {
        self.pb.reset();
        self.pb.set_length(total_pages as u64);
    }

    fn advance(&self, pages_done: usize) {
        self.pb.set_position(pages_done as u64);
    }

    fn finish(&self) {
        self.pb.finish_and_clear();
    }
}
