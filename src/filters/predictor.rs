//! PNG (predictors 10-15) and TIFF (predictor 2) row predictors, applied as a
//! decode stage after flate or LZW.

use crate::object::Object;
use crate::pipeline::Sink;
use crate::{Error, Result};

/// Largest row the predictor will buffer.
pub const MAX_ROW_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParms {
    pub predictor: u8,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl PredictorParms {
    /// `Ok(None)` when no predictor applies. Errors describe why the
    /// parameters are unusable; the stream is then non-filterable.
    pub fn from_object(parms: &Object) -> std::result::Result<Option<PredictorParms>, String> {
        let dict = match parms.as_dict() {
            Ok(dict) => dict,
            Err(_) => return Ok(None),
        };
        let get = |key: &[u8], default: i64| {
            dict.opt(key).and_then(|v| v.as_i64().ok()).unwrap_or(default)
        };
        let predictor = get(b"Predictor", 1);
        if predictor == 1 {
            return Ok(None);
        }
        if predictor != 2 && !(10..=15).contains(&predictor) {
            return Err(format!("predictor {predictor} is not one of 1, 2, 10-15"));
        }
        let columns = get(b"Columns", 1);
        if columns <= 0 {
            return Err(format!("predictor requires Columns > 0, got {columns}"));
        }
        let colors = get(b"Colors", 1);
        if colors <= 0 {
            return Err(format!("predictor requires Colors > 0, got {colors}"));
        }
        let bits_per_component = get(b"BitsPerComponent", 8);
        if ![1, 2, 4, 8, 16].contains(&bits_per_component) {
            return Err(format!("invalid BitsPerComponent {bits_per_component}"));
        }
        Ok(Some(PredictorParms {
            predictor: predictor as u8,
            colors: colors as usize,
            bits_per_component: bits_per_component as usize,
            columns: columns as usize,
        }))
    }

    pub fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

pub struct PredictorDecoder<'a> {
    parms: PredictorParms,
    pending: Vec<u8>,
    previous: Vec<u8>,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> PredictorDecoder<'a> {
    pub fn new(parms: PredictorParms, downstream: Box<dyn Sink + 'a>) -> Result<Self> {
        let row_bytes = parms.row_bytes();
        if row_bytes > MAX_ROW_BYTES {
            return Err(Error::MemoryLimit {
                context: "predictor row",
                limit: MAX_ROW_BYTES,
            });
        }
        if parms.predictor == 2 && parms.bits_per_component < 8 {
            return Err(Error::Unsupported("TIFF predictor with sub-byte components"));
        }
        Ok(PredictorDecoder {
            parms,
            pending: Vec::with_capacity(row_bytes + 1),
            previous: vec![0; row_bytes],
            downstream,
        })
    }

    fn stored_row_len(&self) -> usize {
        // PNG rows carry a leading filter-type byte; TIFF rows do not.
        if self.parms.predictor >= 10 {
            self.parms.row_bytes() + 1
        } else {
            self.parms.row_bytes()
        }
    }

    fn decode_row(&mut self) -> Result<()> {
        let bpp = self.parms.bytes_per_pixel();
        if self.parms.predictor == 2 {
            let mut row = std::mem::take(&mut self.pending);
            tiff_undo(&mut row, bpp, self.parms.bits_per_component);
            self.downstream.write_all(&row)?;
            self.pending = row;
            self.pending.clear();
            return Ok(());
        }
        let filter_type = self.pending[0];
        let mut row = self.pending[1..].to_vec();
        png_undo(filter_type, &mut row, &self.previous, bpp)?;
        self.downstream.write_all(&row)?;
        self.previous = row;
        self.pending.clear();
        Ok(())
    }
}

impl Sink for PredictorDecoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let row_len = self.stored_row_len();
        let mut i = 0;
        while i < data.len() {
            let take = (row_len - self.pending.len()).min(data.len() - i);
            self.pending.extend_from_slice(&data[i..i + take]);
            i += take;
            if self.pending.len() == row_len {
                self.decode_row()?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // A short final row is passed through undone as far as possible.
        if !self.pending.is_empty() {
            let row_len = self.stored_row_len();
            self.pending.resize(row_len, 0);
            self.decode_row()?;
        }
        self.downstream.finish()
    }
}

fn png_undo(filter_type: u8, row: &mut [u8], previous: &[u8], bpp: usize) -> Result<()> {
    match filter_type {
        0 => {}
        1 => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for i in 0..row.len() {
                row[i] = row[i].wrapping_add(previous[i]);
            }
        }
        3 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                let up = previous[i] as u16;
                row[i] = row[i].wrapping_add(((left + up) / 2) as u8);
            }
        }
        4 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] } else { 0 };
                let up = previous[i];
                let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
                row[i] = row[i].wrapping_add(paeth(left, up, up_left));
            }
        }
        other => {
            return Err(Error::InvalidStream(format!("invalid PNG filter type {other}")));
        }
    }
    Ok(())
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn tiff_undo(row: &mut [u8], bpp: usize, bits_per_component: usize) {
    if bits_per_component == 16 {
        let mut i = bpp;
        while i + 1 < row.len() {
            let left = u16::from_be_bytes([row[i - bpp], row[i - bpp + 1]]);
            let cur = u16::from_be_bytes([row[i], row[i + 1]]);
            let sum = cur.wrapping_add(left).to_be_bytes();
            row[i] = sum[0];
            row[i + 1] = sum[1];
            i += 2;
        }
    } else {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
}

/// Apply the PNG Up filter, the form the writer uses for xref streams.
pub fn png_encode_up(data: &[u8], row_bytes: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len().div_ceil(row_bytes.max(1)));
    let mut previous = vec![0u8; row_bytes];
    for row in data.chunks(row_bytes) {
        out.push(2);
        for (i, &b) in row.iter().enumerate() {
            out.push(b.wrapping_sub(previous[i]));
        }
        previous[..row.len()].copy_from_slice(row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dictionary;
    use crate::pipeline::BufferSink;

    struct Capture<'a>(&'a mut BufferSink);

    impl Sink for Capture<'_> {
        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.0.write_all(data)
        }
    }

    fn parms(predictor: i64, columns: i64) -> PredictorParms {
        let mut dict = Dictionary::new();
        dict.set("Predictor", predictor);
        dict.set("Columns", columns);
        PredictorParms::from_object(&Object::Dictionary(dict)).unwrap().unwrap()
    }

    #[test]
    fn validation() {
        let mut dict = Dictionary::new();
        dict.set("Predictor", 9);
        assert!(PredictorParms::from_object(&Object::Dictionary(dict.clone())).is_err());
        dict.set("Predictor", 12);
        dict.set("Columns", 0);
        assert!(PredictorParms::from_object(&Object::Dictionary(dict)).is_err());
        assert!(PredictorParms::from_object(&Object::Null).unwrap().is_none());
    }

    #[test]
    fn png_up_round_trip() {
        let rows: Vec<u8> = (0..40u8).collect();
        let encoded = png_encode_up(&rows, 8);
        let mut out = BufferSink::new();
        {
            let mut decoder = PredictorDecoder::new(parms(12, 8), Box::new(Capture(&mut out))).unwrap();
            decoder.write_all(&encoded).unwrap();
            decoder.finish().unwrap();
        }
        assert_eq!(out.data(), rows.as_slice());
    }

    #[test]
    fn png_sub_filter() {
        // One row of deltas: 10, +1, +1, +1 with the Sub filter.
        let encoded = [1u8, 10, 1, 1, 1];
        let mut out = BufferSink::new();
        {
            let mut decoder = PredictorDecoder::new(parms(11, 4), Box::new(Capture(&mut out))).unwrap();
            decoder.write_all(&encoded).unwrap();
            decoder.finish().unwrap();
        }
        assert_eq!(out.data(), &[10, 11, 12, 13]);
    }

    #[test]
    fn tiff_predictor() {
        let mut dict = Dictionary::new();
        dict.set("Predictor", 2);
        dict.set("Columns", 4);
        let parms = PredictorParms::from_object(&Object::Dictionary(dict)).unwrap().unwrap();
        let mut out = BufferSink::new();
        {
            let mut decoder = PredictorDecoder::new(parms, Box::new(Capture(&mut out))).unwrap();
            decoder.write_all(&[5, 1, 1, 1]).unwrap();
            decoder.finish().unwrap();
        }
        assert_eq!(out.data(), &[5, 6, 7, 8]);
    }

    #[test]
    fn oversized_row_refused() {
        let mut dict = Dictionary::new();
        dict.set("Predictor", 12);
        dict.set("Columns", (MAX_ROW_BYTES + 1) as i64);
        let parms = PredictorParms::from_object(&Object::Dictionary(dict)).unwrap().unwrap();
        let result = PredictorDecoder::new(parms, Box::new(crate::pipeline::NullSink));
        assert!(matches!(result, Err(Error::MemoryLimit { .. })));
    }
}
