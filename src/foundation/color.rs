use serde::{Deserialize, Serialize};

/// An RGB color with channels stored as fractions in 0..1.
///
/// Colors serialize as strings: `#rrggbb` hex, or one of the sixteen basic
/// color names when the value matches one exactly. Deserialization accepts
/// `#rrggbb`, `#rgb` (with or without the `#`), a basic color name, or the
/// empty string, which is read as white.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color(pub [f64; 3]);

impl Color {
    pub fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self([r, g, b])
    }

    pub fn r(&self) -> f64 {
        self.0[0]
    }

    pub fn g(&self) -> f64 {
        self.0[1]
    }

    pub fn b(&self) -> f64 {
        self.0[2]
    }

    /// Convert to 8-bit RGB channels.
    pub fn to_rgb8(self) -> [u8; 3] {
        fn to_u8(x: f64) -> u8 {
            (x.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        [to_u8(self.0[0]), to_u8(self.0[1]), to_u8(self.0[2])]
    }

    fn to_hex(self) -> String {
        let [r, g, b] = self.to_rgb8();
        format!("#{r:02x}{g:02x}{b:02x}")
    }

    /// Parse a color from a name or hex spec, as accepted over the wire.
    pub fn parse(s: &str) -> Result<Self, String> {
        // An empty string is read as white.
        if s.is_empty() {
            return Ok(Self([1.0, 1.0, 1.0]));
        }

        let spec = name_to_hex(s).unwrap_or(s);
        let spec = spec.strip_prefix('#').unwrap_or(spec);

        fn hex_byte(pair: &str) -> Result<u8, String> {
            u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte \"{pair}\""))
        }
        fn hex_nibble(ch: &str) -> Result<u8, String> {
            let v = u8::from_str_radix(ch, 16)
                .map_err(|_| format!("invalid hex digit \"{ch}\""))?;
            Ok(v << 4 | v)
        }

        let (r, g, b) = match spec.len() {
            3 => (
                hex_nibble(&spec[0..1])?,
                hex_nibble(&spec[1..2])?,
                hex_nibble(&spec[2..3])?,
            ),
            6 => (
                hex_byte(&spec[0..2])?,
                hex_byte(&spec[2..4])?,
                hex_byte(&spec[4..6])?,
            ),
            _ => return Err("hex color must be #rgb or #rrggbb".to_owned()),
        };

        Ok(Self([
            f64::from(r) / 255.0,
            f64::from(g) / 255.0,
            f64::from(b) / 255.0,
        ]))
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = self.to_hex();
        match hex_to_name(&hex) {
            Some(name) => f.write_str(name),
            None => f.write_str(&hex),
        }
    }
}

impl Serialize for Color {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Color::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The sixteen basic web colors, lower-case names. The first entry for a hex
/// value wins the reverse mapping.
const NAMED: &[(&str, &str)] = &[
    ("white", "#ffffff"),
    ("silver", "#c0c0c0"),
    ("gray", "#808080"),
    ("black", "#000000"),
    ("red", "#ff0000"),
    ("maroon", "#800000"),
    ("yellow", "#ffff00"),
    ("olive", "#808000"),
    ("lime", "#00ff00"),
    ("green", "#008000"),
    ("aqua", "#00ffff"),
    ("teal", "#008080"),
    ("blue", "#0000ff"),
    ("navy", "#000080"),
    ("fuchsia", "#ff00ff"),
    ("purple", "#800080"),
];

fn name_to_hex(name: &str) -> Option<&'static str> {
    NAMED
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, hex)| *hex)
}

fn hex_to_name(hex: &str) -> Option<&'static str> {
    NAMED.iter().find(|(_, h)| *h == hex).map(|(n, _)| *n)
}
