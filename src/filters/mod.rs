//! Stream filters. Decoding applies the `/Filter` chain in array order,
//! encoding in reverse; each codec is a push [`Sink`] wrapping the next stage.

mod ascii;
#[cfg(feature = "dct")]
mod dct;
mod flate;
mod lzw;
mod predictor;
mod runlength;

pub use ascii::{Ascii85Decoder, Ascii85Encoder, AsciiHexDecoder, AsciiHexEncoder};
#[cfg(feature = "dct")]
pub use dct::DctDecoder;
pub use flate::{FlateDecoder, FlateEncoder};
pub use lzw::LzwDecoder;
pub use predictor::{PredictorDecoder, PredictorParms, png_encode_up};
pub use runlength::{RunLengthDecoder, RunLengthEncoder};

use log::warn;

use crate::object::{Object, Stream};
use crate::pipeline::{BufferSink, Sink, drive};
use crate::{Error, Result};

/// How aggressively stream filters are reversed when materialising bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecodeLevel {
    None,
    #[default]
    Generalized,
    Specialized,
    All,
}

/// Streams carrying more filters than this are treated as non-filterable.
pub const MAX_FILTER_CHAIN: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Flate,
    Lzw,
    RunLength,
    AsciiHex,
    Ascii85,
    Crypt,
    Dct,
    Unknown,
}

impl FilterKind {
    /// Accepts the full names and the inline-image abbreviations.
    pub fn from_name(name: &[u8]) -> FilterKind {
        match name {
            b"FlateDecode" | b"Fl" => FilterKind::Flate,
            b"LZWDecode" | b"LZW" => FilterKind::Lzw,
            b"RunLengthDecode" | b"RL" => FilterKind::RunLength,
            b"ASCIIHexDecode" | b"AHx" => FilterKind::AsciiHex,
            b"ASCII85Decode" | b"A85" => FilterKind::Ascii85,
            b"Crypt" => FilterKind::Crypt,
            b"DCTDecode" | b"DCT" => FilterKind::Dct,
            _ => FilterKind::Unknown,
        }
    }

    fn available(self) -> bool {
        match self {
            FilterKind::Dct => cfg!(feature = "dct"),
            FilterKind::Unknown => false,
            _ => true,
        }
    }
}

/// The level a filter application needs. Predictor parameters push flate and
/// LZW up to `Specialized`.
fn required_level(kind: FilterKind, parms: &Object) -> DecodeLevel {
    let predictor = parms
        .as_dict()
        .ok()
        .and_then(|d| d.opt(b"Predictor"))
        .and_then(|p| p.as_i64().ok())
        .unwrap_or(1);
    match kind {
        FilterKind::Flate | FilterKind::Lzw if predictor > 1 => DecodeLevel::Specialized,
        FilterKind::Flate
        | FilterKind::Lzw
        | FilterKind::RunLength
        | FilterKind::AsciiHex
        | FilterKind::Ascii85
        | FilterKind::Crypt => DecodeLevel::Generalized,
        FilterKind::Dct => DecodeLevel::All,
        FilterKind::Unknown => DecodeLevel::All,
    }
}

/// Whether the whole chain can be reversed at `level`. Unknown filters, an
/// over-long chain, or bad predictor parameters make the stream
/// non-filterable; its raw bytes are still available.
pub fn is_filterable(stream: &Stream, level: DecodeLevel) -> bool {
    let filters = stream.filters();
    if filters.len() > MAX_FILTER_CHAIN {
        warn!("stream has {} filters, treating as non-filterable", filters.len());
        return false;
    }
    let parms = stream.decode_parms();
    for (name, parms) in filters.iter().zip(&parms) {
        let kind = FilterKind::from_name(name);
        let needed = required_level(kind, parms);
        if needed > level {
            // Not an error: the caller asked for a shallower decode.
            return false;
        }
        if !kind.available() {
            warn!(
                "unknown or unavailable filter /{}, treating stream as non-filterable",
                String::from_utf8_lossy(name)
            );
            return false;
        }
        if kind == FilterKind::Flate || kind == FilterKind::Lzw {
            if let Err(message) = PredictorParms::from_object(parms) {
                warn!("invalid predictor parameters: {message}");
                return false;
            }
        }
    }
    true
}

fn early_change(parms: &Object) -> bool {
    parms
        .as_dict()
        .ok()
        .and_then(|d| d.opt(b"EarlyChange"))
        .and_then(|p| p.as_i64().ok())
        .unwrap_or(1)
        != 0
}

/// Build the decode chain for one filter stage around `downstream`.
fn decode_stage<'a>(
    kind: FilterKind, parms: &Object, downstream: Box<dyn Sink + 'a>,
) -> Result<Box<dyn Sink + 'a>> {
    let stage: Box<dyn Sink + 'a> = match kind {
        FilterKind::Flate => {
            let predictor = PredictorParms::from_object(parms).map_err(Error::InvalidStream)?;
            match predictor {
                Some(parms) => Box::new(FlateDecoder::new(Box::new(PredictorDecoder::new(parms, downstream)?))),
                None => Box::new(FlateDecoder::new(downstream)),
            }
        }
        FilterKind::Lzw => {
            let predictor = PredictorParms::from_object(parms).map_err(Error::InvalidStream)?;
            let early = early_change(parms);
            match predictor {
                Some(parms) => {
                    Box::new(LzwDecoder::new(early, Box::new(PredictorDecoder::new(parms, downstream)?)))
                }
                None => Box::new(LzwDecoder::new(early, downstream)),
            }
        }
        FilterKind::RunLength => Box::new(RunLengthDecoder::new(downstream)),
        FilterKind::AsciiHex => Box::new(AsciiHexDecoder::new(downstream)),
        FilterKind::Ascii85 => Box::new(Ascii85Decoder::new(downstream)),
        // Document-level decryption already ran; the named crypt filter is a
        // pass-through here.
        FilterKind::Crypt => downstream,
        #[cfg(feature = "dct")]
        FilterKind::Dct => Box::new(DctDecoder::new(downstream)),
        #[cfg(not(feature = "dct"))]
        FilterKind::Dct => return Err(Error::Unsupported("DCTDecode requires the dct feature")),
        FilterKind::Unknown => return Err(Error::NotFilterable),
    };
    Ok(stage)
}

struct Forward<'a>(&'a mut dyn Sink);

impl Sink for Forward<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.0.write_all(data)
    }

    // The borrowed sink is finished by its owner.
}

fn build_chain<'a>(
    filters: &[Vec<u8>], parms: &[Object], sink: &'a mut dyn Sink,
) -> Result<Box<dyn Sink + 'a>> {
    let mut chain: Box<dyn Sink + 'a> = Box::new(Forward(sink));
    for (name, parms) in filters.iter().zip(parms).rev() {
        chain = decode_stage(FilterKind::from_name(name), parms, chain)?;
    }
    Ok(chain)
}

/// Pipe `raw` through the stream's filter chain up to `level`, writing decoded
/// bytes to `sink`. Filters above the level (and everything after them) are
/// left applied. `finish` reaches the sink on every path.
pub fn pipe_decoded(stream: &Stream, raw: &[u8], level: DecodeLevel, sink: &mut dyn Sink) -> Result<()> {
    let filters = stream.filters();
    let parms = stream.decode_parms();
    if filters.is_empty() || level == DecodeLevel::None {
        return drive(sink, |s| s.write_all(raw));
    }
    if !is_filterable(stream, level) {
        let _ = sink.finish();
        return Err(Error::NotFilterable);
    }
    let result = {
        match build_chain(&filters, &parms, sink) {
            Ok(mut chain) => {
                let result = chain.write_all(raw);
                let finished = chain.finish();
                result.and(finished)
            }
            Err(error) => Err(error),
        }
    };
    let outer = sink.finish();
    result.and(outer)
}

/// Decode to a buffer; convenience over [`pipe_decoded`].
pub fn decode_stream(stream: &Stream, raw: &[u8], level: DecodeLevel) -> Result<Vec<u8>> {
    let mut buffer = BufferSink::new();
    pipe_decoded(stream, raw, level, &mut buffer)?;
    Ok(buffer.into_inner())
}

/// Flate-compress `data`, the writer's one encoding path.
pub fn flate_encode(data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = BufferSink::new();
    {
        let mut encoder = FlateEncoder::new(Box::new(Forward(&mut buffer)));
        encoder.write_all(data)?;
        encoder.finish()?;
    }
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dictionary;

    fn stream_with_filters(filter: Object, parms: Object) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("Filter", filter);
        if !parms.is_null() {
            dict.set("DecodeParms", parms);
        }
        Stream::new(dict, vec![])
    }

    #[test]
    fn flate_round_trip_through_chain() {
        let plain = b"stream data stream data stream data".to_vec();
        let compressed = flate_encode(&plain).unwrap();
        let stream = stream_with_filters(Object::name("FlateDecode"), Object::Null);
        let decoded = decode_stream(&stream, &compressed, DecodeLevel::Generalized).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn chain_applies_in_array_order() {
        // Data was flate-compressed, then hex-encoded: decoding must undo hex
        // first, flate second.
        let plain = b"order matters".to_vec();
        let compressed = flate_encode(&plain).unwrap();
        let hex: Vec<u8> = compressed.iter().flat_map(|b| format!("{b:02X}").into_bytes()).collect();
        let mut raw = hex;
        raw.push(b'>');
        let stream = stream_with_filters(
            Object::Array(vec![Object::name("ASCIIHexDecode"), Object::name("FlateDecode")]),
            Object::Null,
        );
        let decoded = decode_stream(&stream, &raw, DecodeLevel::Generalized).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn unknown_filter_is_not_filterable() {
        let stream = stream_with_filters(Object::name("NoSuchDecode"), Object::Null);
        assert!(!is_filterable(&stream, DecodeLevel::All));
        assert!(matches!(
            decode_stream(&stream, b"x", DecodeLevel::All),
            Err(Error::NotFilterable)
        ));
    }

    #[test]
    fn predictor_needs_specialized_level() {
        let mut parms = Dictionary::new();
        parms.set("Predictor", 12);
        parms.set("Columns", 4);
        let stream = stream_with_filters(Object::name("FlateDecode"), Object::Dictionary(parms));
        assert!(!is_filterable(&stream, DecodeLevel::Generalized));
        assert!(is_filterable(&stream, DecodeLevel::Specialized));
    }

    #[test]
    fn level_none_returns_raw() {
        let stream = stream_with_filters(Object::name("FlateDecode"), Object::Null);
        let raw = b"not really compressed".to_vec();
        assert_eq!(decode_stream(&stream, &raw, DecodeLevel::None).unwrap(), raw);
    }

    #[test]
    fn overlong_chain_rejected() {
        let filters: Vec<Object> = (0..MAX_FILTER_CHAIN + 1).map(|_| Object::name("FlateDecode")).collect();
        let stream = stream_with_filters(Object::Array(filters), Object::Null);
        assert!(!is_filterable(&stream, DecodeLevel::All));
    }

    #[test]
    fn crypt_identity_is_noop() {
        let plain = b"already decrypted".to_vec();
        let compressed = flate_encode(&plain).unwrap();
        let stream = stream_with_filters(
            Object::Array(vec![Object::name("Crypt"), Object::name("FlateDecode")]),
            Object::Null,
        );
        let decoded = decode_stream(&stream, &compressed, DecodeLevel::Generalized).unwrap();
        assert_eq!(decoded, plain);
    }
}
