use std::io::Write;
use std::time::Duration;

use anyhow::Result;

use super::style::PADDING;
use crate::task::{Status, Summary, Surface};

/// Line-oriented output for pipes and CI: one line per task, no live region.
pub struct PlainSurface<W: Write> {
    out: W,
}

impl<W: Write> PlainSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Surface for PlainSurface<W> {
    fn render(&mut self, _frame: usize, _status: &Status) -> Result<()> {
        Ok(())
    }

    fn poll_cancel(&mut self, timeout: Duration) -> Result<bool> {
        std::thread::sleep(timeout);
        Ok(false)
    }

    fn notice(&mut self, message: &str) -> Result<()> {
        writeln!(self.out, "{PADDING}⚠️ {message}")?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self, summary: &Summary) -> Result<()> {
        writeln!(self.out, "{}", summary.text())?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ResultIcon;

    #[test]
    fn prints_one_line_per_event() {
        let mut surface = PlainSurface::new(Vec::new());
        surface.render(3, &Status::new("ignored")).unwrap();
        surface.notice("server clock is odd").unwrap();
        surface
            .finish(&Summary::Done {
                icon: Some(ResultIcon::Success),
                message: "downloaded data.osm.pbf".into(),
            })
            .unwrap();

        let out = String::from_utf8(surface.into_inner()).unwrap();
        assert_eq!(
            out,
            "  ⚠️ server clock is odd\n✅ downloaded data.osm.pbf\n"
        );
    }

    #[test]
    fn never_cancels() {
        let mut surface = PlainSurface::new(Vec::new());
        assert!(!surface.poll_cancel(Duration::from_millis(1)).unwrap());
    }
}
