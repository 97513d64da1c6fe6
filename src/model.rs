use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::foundation::color::Color;
use crate::foundation::error::{ForgeError, ForgeResult};

/// A base template for an image macro.
///
/// Templates are immutable after upload except for the `hidden` flag. A
/// hidden template is still renderable by macros created before it was
/// hidden, but the metadata layer excludes it from listings and refuses new
/// macros against it. The image bytes at `path` are read-only inputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: u64,
    /// Path of the image file.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Descriptive label, canonicalized via [`canonical_template_name`].
    pub name: String,
    /// Creator identity; `-1` is the anonymous sentinel.
    #[serde(default = "anonymous")]
    pub creator: i64,
    pub created_at: String,
    /// Optional predefined placement areas.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub areas: Vec<Area>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

fn anonymous() -> i64 {
    -1
}

impl Template {
    /// The template file's extension with its leading dot (`".gif"`), or an
    /// empty string when the path has none. Drives cache naming and encoder
    /// dispatch.
    pub fn extension(&self) -> String {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!(".{}", ext.to_ascii_lowercase()),
            None => String::new(),
        }
    }
}

/// Canonicalize a template name: trimmed, lower-cased, with runs of
/// whitespace and the separators `_`/`-` collapsed to single dashes.
pub fn canonical_template_name(name: &str) -> String {
    let base = name
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    let mut out = String::with_capacity(base.len());
    let mut prev_dash = false;
    for ch in base.chars() {
        let mapped = if ch == '_' || ch == '-' { '-' } else { ch };
        if mapped == '-' {
            if !prev_dash {
                out.push('-');
            }
            prev_dash = true;
        } else {
            out.push(mapped);
            prev_dash = false;
        }
    }
    out.trim_matches('-').to_string()
}

/// A template plus one or more text overlays; the renderable unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Macro {
    pub id: u64,
    #[serde(rename = "templateID")]
    pub template_id: u64,
    #[serde(default = "anonymous")]
    pub creator: i64,
    pub created_at: String,
    pub text_overlay: Vec<TextLine>,

    // Vote tallies are carried for the metadata layer; rendering ignores them.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub upvotes: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub downvotes: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Macro {
    /// Check that this macro is acceptable as a new creation request.
    pub fn validate_for_create(&self) -> ForgeResult<()> {
        if self.id != 0 {
            return Err(ForgeError::input("macro ID must be zero"));
        }
        if self.template_id == 0 {
            return Err(ForgeError::input("macro must have a template ID"));
        }
        if self.text_overlay.is_empty() {
            return Err(ForgeError::input("macro must have an overlay"));
        }
        if self.upvotes != 0 || self.downvotes != 0 {
            return Err(ForgeError::input("macro must not contain votes"));
        }
        for line in &self.text_overlay {
            line.validate_for_create()?;
        }
        Ok(())
    }
}

/// A region of an image where text is placed. The anchor is relative to the
/// top-left of the image; width is a fraction of the image width, with 0
/// meaning the full dimension may be used.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Area {
    /// X offset of the anchor as a fraction 0..1 of width.
    pub x: f64,
    /// Y offset of the anchor as a fraction 0..1 of height.
    pub y: f64,
    /// Width of the text box as a fraction of image width.
    #[serde(default, skip_serializing_if = "width_is_zero")]
    pub width: f64,
    /// When rendering multiple frames, interpolate the effective coordinates
    /// toward the next area in sequence. Ignored on single-frame templates.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tween: bool,
}

fn width_is_zero(w: &f64) -> bool {
    *w == 0.0
}

impl Area {
    pub fn validate_for_create(&self) -> ForgeResult<()> {
        if !(0.0..=1.0).contains(&self.x) {
            return Err(ForgeError::input(format!("x out of range {}", self.x)));
        }
        if !(0.0..=1.0).contains(&self.y) {
            return Err(ForgeError::input(format!("y out of range {}", self.y)));
        }
        if !(0.0..=1.0).contains(&self.width) {
            return Err(ForgeError::input(format!(
                "width out of range {}",
                self.width
            )));
        }
        Ok(())
    }
}

/// A list of [`Area`] values that decodes from JSON as either a single
/// object or an array, and encodes a singleton as a plain object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Areas(pub Vec<Area>);

impl std::ops::Deref for Areas {
    type Target = [Area];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Area>> for Areas {
    fn from(v: Vec<Area>) -> Self {
        Self(v)
    }
}

impl Serialize for Areas {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.0.len() == 1 {
            self.0[0].serialize(serializer)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Areas {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Many(Vec<Area>),
            One(Area),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Many(v) => Self(v),
            Repr::One(a) => Self(vec![a]),
        })
    }
}

/// One line of overlay text.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextLine {
    pub text: String,
    pub color: Color,
    pub stroke_color: Color,

    /// The location(s) where the text is drawn; must be non-empty. A
    /// single-frame image uses only the first entry. On a multi-frame image
    /// the areas are applied cyclically in equal bands of frames.
    pub field: Areas,

    /// First point where this line is visible, as a fraction 0..1 of the
    /// total frames. 0 shows the line from the first frame.
    #[serde(default, skip_serializing_if = "width_is_zero")]
    pub start: f64,

    /// Last point where this line is visible, as a fraction 0..1 of the
    /// total frames. Values not greater than `start` leave the line visible
    /// through the end of the animation.
    #[serde(default, skip_serializing_if = "width_is_zero")]
    pub end: f64,
}

impl TextLine {
    pub fn validate_for_create(&self) -> ForgeResult<()> {
        if self.text.is_empty() {
            return Err(ForgeError::input("text is empty"));
        }
        if self.field.is_empty() {
            return Err(ForgeError::input("no fields specified"));
        }
        if !(0.0..=1.0).contains(&self.start) {
            return Err(ForgeError::input(format!(
                "start out of range {}",
                self.start
            )));
        }
        if !(0.0..=1.0).contains(&self.end) {
            return Err(ForgeError::input(format!("end out of range {}", self.end)));
        }
        for area in self.field.iter() {
            area.validate_for_create()?;
        }
        Ok(())
    }
}

/// Build a [`Macro`] value for tests and one-shot CLI rendering.
pub fn macro_from_overlay(id: u64, template_id: u64, overlay: Vec<TextLine>) -> Macro {
    Macro {
        id,
        template_id,
        creator: -1,
        created_at: String::new(),
        text_overlay: overlay,
        upvotes: 0,
        downvotes: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn basic_line() -> TextLine {
        TextLine {
            text: "hello".to_string(),
            color: Color::rgb(1.0, 1.0, 1.0),
            stroke_color: Color::rgb(0.0, 0.0, 0.0),
            field: Areas(vec![Area {
                x: 0.5,
                y: 0.9,
                width: 0.0,
                tween: false,
            }]),
            start: 0.0,
            end: 0.0,
        }
    }

    fn basic_macro() -> Macro {
        macro_from_overlay(0, 3, vec![basic_line()])
    }

    #[test]
    fn macro_json_round_trip() {
        let m = basic_macro();
        let s = serde_json::to_string(&m).unwrap();
        let de: Macro = serde_json::from_str(&s).unwrap();
        assert_eq!(de.template_id, 3);
        assert_eq!(de.text_overlay.len(), 1);
        assert!(s.contains("\"templateID\":3"));
    }

    #[test]
    fn areas_decode_object_or_list() {
        let one: Areas = serde_json::from_value(json!({"x": 0.1, "y": 0.2})).unwrap();
        assert_eq!(one.len(), 1);

        let two: Areas =
            serde_json::from_value(json!([{"x": 0.1, "y": 0.2}, {"x": 0.3, "y": 0.4}])).unwrap();
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn singleton_areas_encode_as_object() {
        let a = Areas(vec![Area {
            x: 0.5,
            y: 0.5,
            width: 0.0,
            tween: false,
        }]);
        let v = serde_json::to_value(&a).unwrap();
        assert!(v.is_object());

        let b = Areas(vec![
            Area {
                x: 0.1,
                y: 0.1,
                width: 0.0,
                tween: false,
            },
            Area {
                x: 0.9,
                y: 0.9,
                width: 0.0,
                tween: false,
            },
        ]);
        assert!(serde_json::to_value(&b).unwrap().is_array());
    }

    #[test]
    fn validate_rejects_missing_overlay() {
        let mut m = basic_macro();
        m.text_overlay.clear();
        assert!(m.validate_for_create().is_err());
    }

    #[test]
    fn validate_rejects_nonzero_id_and_votes() {
        let mut m = basic_macro();
        m.id = 7;
        assert!(m.validate_for_create().is_err());

        let mut m = basic_macro();
        m.upvotes = 1;
        assert!(m.validate_for_create().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_fractions() {
        let mut m = basic_macro();
        m.text_overlay[0].start = 1.5;
        assert!(m.validate_for_create().is_err());

        let mut m = basic_macro();
        m.text_overlay[0].field.0[0].x = -0.2;
        assert!(m.validate_for_create().is_err());
    }

    #[test]
    fn canonical_names_collapse_separators() {
        assert_eq!(canonical_template_name("  Big   Brain_Time "), "big-brain-time");
        assert_eq!(canonical_template_name("Already-fine"), "already-fine");
        assert_eq!(canonical_template_name("___"), "");
    }

    #[test]
    fn template_extension_is_lowercase_dotted() {
        let mut t = Template {
            id: 1,
            path: PathBuf::from("/store/templates/1.GIF"),
            width: 10,
            height: 10,
            name: "x".into(),
            creator: -1,
            created_at: String::new(),
            areas: Vec::new(),
            hidden: false,
        };
        assert_eq!(t.extension(), ".gif");
        t.path = PathBuf::from("/store/templates/noext");
        assert_eq!(t.extension(), "");
    }
}
