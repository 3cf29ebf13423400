use std::path::Path;

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::report::domain::timestamp_decoder::{TimestampDecoder, TimestampError};
use crate::video::infrastructure::frame_stream::TimestampBuffer;

/// Pixels at or above this luminance count as overlay text.
const INK_THRESHOLD: u8 = 128;

/// Glyph file stem for each character the overlay may contain.
const GLYPH_FILES: &[(char, &str)] = &[
    ('0', "0"),
    ('1', "1"),
    ('2', "2"),
    ('3', "3"),
    ('4', "4"),
    ('5', "5"),
    ('6', "6"),
    ('7', "7"),
    ('8', "8"),
    ('9', "9"),
    (':', "colon"),
    ('/', "slash"),
    ('-', "dash"),
    ('.', "period"),
];

struct Glyph {
    ch: char,
    image: GrayImage,
}

/// Reads fixed-width overlay timestamps by template matching.
///
/// The crop is split into cells one glyph wide. Each non-blank cell is
/// binarized and assigned the glyph with the smallest Hamming distance.
/// Blank cells read as spaces; surrounding blanks are trimmed.
pub struct GlyphTimestampDecoder {
    glyphs: Vec<Glyph>,
    glyph_width: u32,
    glyph_height: u32,
}

impl GlyphTimestampDecoder {
    /// Loads `<dir>/<name>.png` for every known character that has one.
    pub fn load(dir: &Path) -> Result<Self, TimestampError> {
        let mut glyphs = Vec::new();
        for (ch, stem) in GLYPH_FILES {
            let path = dir.join(format!("{stem}.png"));
            if !path.is_file() {
                continue;
            }
            let image = image::open(&path)
                .map_err(|e| TimestampError::Glyph {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
                .to_luma8();
            glyphs.push(Glyph { ch: *ch, image });
        }
        log::debug!("loaded {} timestamp glyphs from {}", glyphs.len(), dir.display());
        Self::from_glyphs(dir, glyphs)
    }

    fn from_glyphs(dir: &Path, glyphs: Vec<Glyph>) -> Result<Self, TimestampError> {
        let first = glyphs
            .first()
            .ok_or_else(|| TimestampError::NoGlyphs(dir.to_path_buf()))?;
        let (glyph_width, glyph_height) = first.image.dimensions();
        if glyph_width == 0
            || glyph_height == 0
            || glyphs.iter().any(|g| g.image.dimensions() != (glyph_width, glyph_height))
        {
            return Err(TimestampError::MixedGlyphSizes {
                dir: dir.to_path_buf(),
            });
        }
        Ok(Self {
            glyphs,
            glyph_width,
            glyph_height,
        })
    }

    /// Glyph bitmaps scaled to the crop height.
    fn templates(&self, height: u32) -> (u32, Vec<(char, Vec<bool>)>) {
        let width = if height == self.glyph_height {
            self.glyph_width
        } else {
            ((self.glyph_width as u64 * height as u64) / self.glyph_height as u64).max(1) as u32
        };
        let templates = self
            .glyphs
            .iter()
            .map(|g| {
                let scaled = if (width, height) == (self.glyph_width, self.glyph_height) {
                    g.image.clone()
                } else {
                    imageops::resize(&g.image, width, height, FilterType::Nearest)
                };
                (g.ch, scaled.pixels().map(|p| p.0[0] >= INK_THRESHOLD).collect())
            })
            .collect();
        (width, templates)
    }

    fn read_crop(
        &self,
        crop: &[u8],
        crop_width: u32,
        channels: u8,
        cell_width: u32,
        templates: &[(char, Vec<bool>)],
    ) -> String {
        let ink = binarize(crop, channels);
        let height = (ink.len() / crop_width.max(1) as usize) as u32;
        let mut text = String::new();

        for cell in 0..crop_width / cell_width {
            let x0 = cell * cell_width;
            let bits: Vec<bool> = (0..height)
                .flat_map(|y| {
                    let row = (y * crop_width) as usize;
                    (x0..x0 + cell_width).map(move |x| row + x as usize)
                })
                .map(|i| ink[i])
                .collect();
            if !bits.iter().any(|b| *b) {
                text.push(' ');
                continue;
            }
            let best = templates
                .iter()
                .min_by_key(|(_, template)| hamming(&bits, template));
            if let Some((ch, _)) = best {
                text.push(*ch);
            }
        }
        text.trim().to_string()
    }
}

impl TimestampDecoder for GlyphTimestampDecoder {
    fn stringify(&self, crops: &TimestampBuffer) -> Result<Vec<String>, TimestampError> {
        let window = crops.window();
        let (cell_width, templates) = self.templates(window.height);
        (0..crops.len())
            .map(|i| {
                let crop = crops
                    .crop(i)
                    .ok_or(TimestampError::MissingCrop { index: i })?;
                Ok(self.read_crop(
                    crop,
                    window.width,
                    crops.channels(),
                    cell_width,
                    &templates,
                ))
            })
            .collect()
    }
}

fn binarize(pixels: &[u8], channels: u8) -> Vec<bool> {
    let ch = channels.max(1) as usize;
    pixels
        .chunks_exact(ch)
        .map(|px| {
            let luma = if ch >= 3 {
                (px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000
            } else {
                px[0] as u32
            };
            luma >= INK_THRESHOLD as u32
        })
        .collect()
}

fn hamming(a: &[bool], b: &[bool]) -> usize {
    a.iter().zip(b).filter(|(x, y)| x != y).count() + a.len().abs_diff(b.len())
}
