//! Minimal FITS writer for single-image files.
//!
//! Covers exactly what a snapshot tile needs: one primary HDU with a
//! 32-bit float 2-D image, string/number/comment header cards and the
//! mandatory 2880-byte block padding. Data is big-endian per the FITS
//! standard. Creating a file clobbers any previous one with the same name
//! so an interrupted run can be repeated.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::time::TimeStamp;

const BLOCK: usize = 2880;
const CARD: usize = 80;

/// Writer for one FITS file: collect header cards, then stream image rows.
///
/// All header cards must be added before the first row; the header block is
/// flushed lazily when the first row arrives.
pub struct FitsWriter {
    file: BufWriter<File>,
    cards: Vec<String>,
    header_written: bool,
    data_bytes: usize,
}

impl FitsWriter {
    /// Create (or overwrite) the file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: BufWriter::new(File::create(path)?),
            cards: Vec::new(),
            header_written: false,
            data_bytes: 0,
        })
    }

    /// Declare a `width` x `height` 32-bit float image. Must come first;
    /// emits the mandatory SIMPLE/BITPIX/NAXIS cards.
    pub fn create_image(&mut self, width: usize, height: usize) {
        assert!(self.cards.is_empty(), "create_image must be the first card");

        self.push_card("SIMPLE", &format!("{:>20}", "T"), "file conforms to FITS standard");
        self.write_key_i64("BITPIX", -32, "32-bit IEEE floating point");
        self.write_key_i64("NAXIS", 2, "number of data axes");
        self.write_key_i64("NAXIS1", width as i64, "");
        self.write_key_i64("NAXIS2", height as i64, "");
    }

    pub fn write_key_str(&mut self, keyword: &str, value: &str, comment: &str) {
        // Strings start with a quote in column 11 and are at least 8
        // characters wide inside the quotes; embedded quotes are doubled.
        let escaped = value.replace('\'', "''");
        self.push_card(keyword, &format!("{:<20}", format!("'{escaped:<8}'")), comment);
    }

    pub fn write_key_i64(&mut self, keyword: &str, value: i64, comment: &str) {
        self.push_card(keyword, &format!("{value:>20}"), comment);
    }

    pub fn write_key_f64(&mut self, keyword: &str, value: f64, comment: &str) {
        self.push_card(keyword, &format!("{:>20}", format!("{value:.9E}")), comment);
    }

    /// Free-form COMMENT card.
    pub fn comment(&mut self, text: &str) {
        self.cards.push(trim_card(format!("COMMENT {text}")));
    }

    /// DATE card with the current UTC time.
    pub fn date(&mut self) {
        let now = TimeStamp::now().format("%Y-%m-%dT%H:%M:%S", false);
        self.write_key_str("DATE", &now, "file creation date (UTC)");
    }

    fn push_card(&mut self, keyword: &str, value_field: &str, comment: &str) {
        // Fixed format: keyword in columns 1-8, "= " in 9-10, then the
        // pre-justified value field (numbers right-aligned to column 30,
        // strings left-aligned from column 11), then the comment.
        let mut card = format!("{keyword:<8}= {value_field}");
        if !comment.is_empty() {
            card.push_str(" / ");
            card.push_str(comment);
        }
        self.cards.push(trim_card(card));
    }

    fn write_header(&mut self) -> io::Result<()> {
        let mut block = Vec::with_capacity((self.cards.len() + 1) * CARD);
        for card in &self.cards {
            block.extend_from_slice(format!("{:<width$}", card, width = CARD).as_bytes());
        }
        block.extend_from_slice(format!("{:<width$}", "END", width = CARD).as_bytes());
        pad(&mut block, b' ');

        self.file.write_all(&block)?;
        self.header_written = true;
        Ok(())
    }

    /// Append one image row (big-endian floats). The first row flushes the
    /// header.
    pub fn write_row(&mut self, row: &[f32]) -> io::Result<()> {
        if !self.header_written {
            self.write_header()?;
        }

        let mut bytes = Vec::with_capacity(row.len() * 4);
        for &value in row {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        self.data_bytes += bytes.len();
        self.file.write_all(&bytes)
    }

    /// Pad the data unit to a whole block and flush.
    pub fn finish(mut self) -> io::Result<()> {
        if !self.header_written {
            self.write_header()?;
        }

        let tail = self.data_bytes % BLOCK;
        if tail != 0 {
            self.file.write_all(&vec![0u8; BLOCK - tail])?;
        }
        self.file.flush()
    }
}

fn pad(block: &mut Vec<u8>, fill: u8) {
    let tail = block.len() % BLOCK;
    if tail != 0 {
        block.resize(block.len() + BLOCK - tail, fill);
    }
}

/// Cut a card down to 80 bytes without splitting a UTF-8 sequence.
fn trim_card(mut card: String) -> String {
    if card.len() > CARD {
        let mut end = CARD;
        while !card.is_char_boundary(end) {
            end -= 1;
        }
        card.truncate(end);
    }
    card
}
