use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array3;

use crate::cube::Cube;
use crate::error::{BorealisError, Result};

pub const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;
const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Value of a single header card.
#[derive(Clone, Debug, PartialEq)]
pub enum CardValue {
    Logical(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl CardValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_logical(&self) -> Option<bool> {
        match self {
            Self::Logical(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for CardValue {
    fn from(v: bool) -> Self {
        Self::Logical(v)
    }
}

impl From<i64> for CardValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for CardValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for CardValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for CardValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl std::fmt::Display for CardValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logical(true) => write!(f, "T"),
            Self::Logical(false) => write!(f, "F"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Card {
    pub keyword: String,
    pub value: CardValue,
    pub comment: Option<String>,
}

/// Ordered FITS header.
///
/// Keywords are unique except for COMMENT and HISTORY, which may repeat.
/// Structural cards (SIMPLE, BITPIX, NAXIS*, BSCALE, BZERO) are kept out
/// of the card list and regenerated on write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.cards.iter().any(|c| c.keyword == keyword)
    }

    pub fn get(&self, keyword: &str) -> Option<&CardValue> {
        self.cards
            .iter()
            .find(|c| c.keyword == keyword)
            .map(|c| &c.value)
    }

    pub fn comment_for(&self, keyword: &str) -> Option<&str> {
        self.cards
            .iter()
            .find(|c| c.keyword == keyword)
            .and_then(|c| c.comment.as_deref())
    }

    /// Insert or replace a card. COMMENT/HISTORY cards always append.
    pub fn set(&mut self, keyword: &str, value: impl Into<CardValue>, comment: Option<&str>) {
        let card = Card {
            keyword: keyword.to_string(),
            value: value.into(),
            comment: comment.map(str::to_string),
        };
        if keyword != "COMMENT" && keyword != "HISTORY" {
            if let Some(existing) = self.cards.iter_mut().find(|c| c.keyword == keyword) {
                *existing = card;
                return;
            }
        }
        self.cards.push(card);
    }

    pub fn remove(&mut self, keyword: &str) {
        self.cards.retain(|c| c.keyword != keyword);
    }

    pub fn int(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(CardValue::as_int)
    }

    pub fn float(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(CardValue::as_float)
    }

    pub fn string(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(CardValue::as_str)
    }

    pub fn logical(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(CardValue::as_logical)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Missing-keyword error with file identity attached.
pub fn missing_keyword(path: &Path, key: &str) -> BorealisError {
    BorealisError::MissingKeyword {
        path: path.to_path_buf(),
        key: key.to_string(),
    }
}

/// Memory-mapped FITS reader for the primary HDU.
pub struct FitsReader {
    mmap: Mmap,
    pub header: Header,
    data_start: usize,
    shape: (usize, usize, usize),
    bitpix: i64,
    bscale: f64,
    bzero: f64,
}

impl FitsReader {
    /// Open a FITS file and parse its primary header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < BLOCK_SIZE {
            return Err(BorealisError::InvalidFits(format!(
                "{}: file too small for a FITS header",
                path.display()
            )));
        }
        if &mmap[0..6] != b"SIMPLE" {
            return Err(BorealisError::InvalidFits(format!(
                "{}: missing SIMPLE card",
                path.display()
            )));
        }

        let (header, structural, data_start) = parse_header_blocks(&mmap, path)?;

        let bitpix = structural.bitpix.ok_or_else(|| {
            BorealisError::InvalidFits(format!("{}: missing BITPIX", path.display()))
        })?;
        if !matches!(bitpix, 8 | 16 | 32 | -32 | -64) {
            return Err(BorealisError::InvalidFits(format!(
                "{}: unsupported BITPIX {bitpix}",
                path.display()
            )));
        }
        let naxis = structural.naxis.unwrap_or(0);
        if !(2..=3).contains(&naxis) {
            return Err(BorealisError::InvalidFits(format!(
                "{}: expected 2- or 3-dimensional data, got NAXIS = {naxis}",
                path.display()
            )));
        }
        let nx = structural.axes[0].unwrap_or(0) as usize;
        let ny = structural.axes[1].unwrap_or(0) as usize;
        let nz = if naxis == 3 {
            structural.axes[2].unwrap_or(1) as usize
        } else {
            1
        };

        let bytes_per_value = (bitpix.unsigned_abs() / 8) as usize;
        let expected = data_start + nx * ny * nz * bytes_per_value;
        if mmap.len() < expected {
            return Err(BorealisError::InvalidFits(format!(
                "{}: truncated data, expected at least {} bytes, got {}",
                path.display(),
                expected,
                mmap.len()
            )));
        }

        Ok(Self {
            mmap,
            header,
            data_start,
            shape: (nz, ny, nx),
            bitpix,
            bscale: structural.bscale.unwrap_or(1.0),
            bzero: structural.bzero.unwrap_or(0.0),
        })
    }

    /// Data shape as (frames, height, width).
    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    pub fn frame_count(&self) -> usize {
        self.shape.0
    }

    /// Decode the full data array, applying BSCALE/BZERO.
    pub fn read_cube(&self) -> Result<Array3<f32>> {
        let (nz, ny, nx) = self.shape;
        let n = nz * ny * nx;
        let raw = &self.mmap[self.data_start..];
        let scale = self.bscale as f32;
        let zero = self.bzero as f32;

        let mut values = Vec::with_capacity(n);
        match self.bitpix {
            8 => values.extend(raw[..n].iter().map(|&b| b as f32 * scale + zero)),
            16 => values.extend(
                (0..n).map(|i| BigEndian::read_i16(&raw[2 * i..]) as f32 * scale + zero),
            ),
            32 => values.extend(
                (0..n).map(|i| BigEndian::read_i32(&raw[4 * i..]) as f32 * scale + zero),
            ),
            -32 => values.extend((0..n).map(|i| BigEndian::read_f32(&raw[4 * i..]) * scale + zero)),
            -64 => values.extend(
                (0..n).map(|i| BigEndian::read_f64(&raw[8 * i..]) as f32 * scale + zero),
            ),
            other => {
                return Err(BorealisError::InvalidFits(format!(
                    "unsupported BITPIX {other}"
                )))
            }
        }

        Array3::from_shape_vec((nz, ny, nx), values)
            .map_err(|e| BorealisError::InvalidFits(e.to_string()))
    }
}

#[derive(Default)]
struct StructuralCards {
    bitpix: Option<i64>,
    naxis: Option<i64>,
    axes: [Option<i64>; 3],
    bscale: Option<f64>,
    bzero: Option<f64>,
}

fn parse_header_blocks(data: &[u8], path: &Path) -> Result<(Header, StructuralCards, usize)> {
    let mut header = Header::new();
    let mut structural = StructuralCards::default();
    let mut offset = 0;

    loop {
        if offset + BLOCK_SIZE > data.len() {
            return Err(BorealisError::InvalidFits(format!(
                "{}: header has no END card",
                path.display()
            )));
        }
        let block = &data[offset..offset + BLOCK_SIZE];
        for i in 0..CARDS_PER_BLOCK {
            let card = &block[i * CARD_SIZE..(i + 1) * CARD_SIZE];
            let keyword = std::str::from_utf8(&card[..8])
                .map_err(|_| {
                    BorealisError::InvalidFits(format!(
                        "{}: non-ASCII header keyword",
                        path.display()
                    ))
                })?
                .trim_end()
                .to_string();

            if keyword == "END" {
                return Ok((header, structural, offset + BLOCK_SIZE));
            }
            if keyword.is_empty() {
                continue;
            }

            let body = String::from_utf8_lossy(&card[8..]);
            if keyword == "COMMENT" || keyword == "HISTORY" {
                header.set(&keyword, body.trim(), None);
                continue;
            }
            if !body.starts_with("= ") {
                continue;
            }
            let (value, comment) = parse_card_value(&body[2..]);
            let Some(value) = value else { continue };

            match keyword.as_str() {
                "SIMPLE" | "EXTEND" => {}
                "BITPIX" => structural.bitpix = value.as_int(),
                "NAXIS" => structural.naxis = value.as_int(),
                "NAXIS1" => structural.axes[0] = value.as_int(),
                "NAXIS2" => structural.axes[1] = value.as_int(),
                "NAXIS3" => structural.axes[2] = value.as_int(),
                "BSCALE" => structural.bscale = value.as_float(),
                "BZERO" => structural.bzero = value.as_float(),
                _ => header.set(&keyword, value, comment.as_deref()),
            }
        }
        offset += BLOCK_SIZE;
    }
}

fn parse_card_value(body: &str) -> (Option<CardValue>, Option<String>) {
    let body = body.trim_start();
    if let Some(rest) = body.strip_prefix('\'') {
        // quoted string, '' is an escaped quote
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    break;
                }
            } else {
                value.push(ch);
            }
        }
        let tail: String = chars.collect();
        let comment = tail
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .filter(|c| !c.is_empty());
        return (
            Some(CardValue::Str(value.trim_end().to_string())),
            comment,
        );
    }

    let (value_str, comment) = match body.split_once('/') {
        Some((v, c)) => (v.trim(), Some(c.trim().to_string()).filter(|c| !c.is_empty())),
        None => (body.trim(), None),
    };
    let value = match value_str {
        "" => None,
        "T" => Some(CardValue::Logical(true)),
        "F" => Some(CardValue::Logical(false)),
        s => s
            .parse::<i64>()
            .map(CardValue::Int)
            .ok()
            .or_else(|| s.parse::<f64>().map(CardValue::Float).ok()),
    };
    (value, comment)
}

/// Read a full FITS cube (2-D data becomes a single-frame cube).
pub fn read_fits(path: &Path) -> Result<Cube> {
    let reader = FitsReader::open(path)?;
    let data = reader.read_cube()?;
    Ok(Cube {
        data,
        header: reader.header,
    })
}

/// Read only the primary header.
pub fn read_header(path: &Path) -> Result<Header> {
    Ok(FitsReader::open(path)?.header)
}

/// Write data as a BITPIX -32 primary HDU. Single-frame cubes are written
/// as 2-D images.
pub fn write_fits(path: &Path, data: &Array3<f32>, header: &Header) -> Result<()> {
    let (nz, ny, nx) = data.dim();
    let mut out = BufWriter::new(File::create(path)?);

    let mut cards: Vec<String> = Vec::new();
    cards.push(format_card("SIMPLE", &CardValue::Logical(true), Some("conforms to FITS standard")));
    cards.push(format_card("BITPIX", &CardValue::Int(-32), Some("array data type")));
    if nz > 1 {
        cards.push(format_card("NAXIS", &CardValue::Int(3), None));
        cards.push(format_card("NAXIS1", &CardValue::Int(nx as i64), None));
        cards.push(format_card("NAXIS2", &CardValue::Int(ny as i64), None));
        cards.push(format_card("NAXIS3", &CardValue::Int(nz as i64), None));
    } else {
        cards.push(format_card("NAXIS", &CardValue::Int(2), None));
        cards.push(format_card("NAXIS1", &CardValue::Int(nx as i64), None));
        cards.push(format_card("NAXIS2", &CardValue::Int(ny as i64), None));
    }
    for card in header.iter() {
        cards.push(format_card(
            &card.keyword,
            &card.value,
            card.comment.as_deref(),
        ));
    }
    cards.push(format!("{:<80}", "END"));

    let mut header_bytes: Vec<u8> = cards.concat().into_bytes();
    pad_to_block(&mut header_bytes, b' ');
    out.write_all(&header_bytes)?;

    for &value in data.iter() {
        out.write_f32::<BigEndian>(value)?;
    }
    let data_bytes = nz * ny * nx * 4;
    let remainder = data_bytes % BLOCK_SIZE;
    if remainder != 0 {
        out.write_all(&vec![0u8; BLOCK_SIZE - remainder])?;
    }
    out.flush()?;
    Ok(())
}

fn pad_to_block(bytes: &mut Vec<u8>, fill: u8) {
    let remainder = bytes.len() % BLOCK_SIZE;
    if remainder != 0 {
        bytes.resize(bytes.len() + BLOCK_SIZE - remainder, fill);
    }
}

fn format_card(keyword: &str, value: &CardValue, comment: Option<&str>) -> String {
    let mut card = if keyword == "COMMENT" || keyword == "HISTORY" {
        format!("{keyword:<8}{value}")
    } else {
        let value_str = match value {
            CardValue::Logical(true) => format!("{:>20}", "T"),
            CardValue::Logical(false) => format!("{:>20}", "F"),
            CardValue::Int(v) => format!("{v:>20}"),
            CardValue::Float(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{:>20}", format!("{v:.1}"))
                } else {
                    format!("{v:>20}")
                }
            }
            CardValue::Str(v) => format!("'{:<8}'", v.replace('\'', "''")),
        };
        let mut s = format!("{keyword:<8}= {value_str}");
        if let Some(comment) = comment {
            s.push_str(" / ");
            s.push_str(comment);
        }
        s
    };
    card.truncate(CARD_SIZE);
    format!("{card:<80}")
}
