use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Length,
    Mass,
    Volume,
    Temperature,
}

#[derive(Debug, Clone, Copy)]
struct Unit {
    dimension: Dimension,
    /// Multiplier into the dimension's base unit (metre, kilogram, litre).
    /// Unused for temperature.
    factor: f64,
    symbol: &'static str,
}

const fn unit(dimension: Dimension, factor: f64, symbol: &'static str) -> Unit {
    Unit {
        dimension,
        factor,
        symbol,
    }
}

fn lookup_unit(raw: &str) -> Option<Unit> {
    use Dimension::{Length, Mass, Temperature, Volume};
    let normalized = raw.trim().trim_start_matches('°').to_ascii_lowercase();
    let found = match normalized.as_str() {
        "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => {
            unit(Length, 0.001, "mm")
        }
        "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => {
            unit(Length, 0.01, "cm")
        }
        "m" | "meter" | "meters" | "metre" | "metres" => unit(Length, 1.0, "m"),
        "km" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => {
            unit(Length, 1_000.0, "km")
        }
        "in" | "inch" | "inches" => unit(Length, 0.0254, "in"),
        "ft" | "foot" | "feet" => unit(Length, 0.3048, "ft"),
        "yd" | "yard" | "yards" => unit(Length, 0.9144, "yd"),
        "mi" | "mile" | "miles" => unit(Length, 1_609.344, "miles"),
        "mg" | "milligram" | "milligrams" => unit(Mass, 0.000_001, "mg"),
        "g" | "gram" | "grams" => unit(Mass, 0.001, "g"),
        "kg" | "kilogram" | "kilograms" | "kilo" | "kilos" => unit(Mass, 1.0, "kg"),
        "lb" | "lbs" | "pound" | "pounds" => unit(Mass, 0.453_592_37, "lb"),
        "oz" | "ounce" | "ounces" => unit(Mass, 0.028_349_523_125, "oz"),
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => {
            unit(Volume, 0.001, "ml")
        }
        "l" | "liter" | "liters" | "litre" | "litres" => unit(Volume, 1.0, "L"),
        "gal" | "gallon" | "gallons" => unit(Volume, 3.785_411_784, "gal"),
        "c" | "celsius" => unit(Temperature, 0.0, "°C"),
        "f" | "fahrenheit" => unit(Temperature, 0.0, "°F"),
        "k" | "kelvin" => unit(Temperature, 0.0, "K"),
        _ => return None,
    };
    Some(found)
}

fn conversion_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)(-?\d+(?:\.\d+)?)\s*(°?[a-z]+)\s+(?:to|in|into)\s+(°?[a-z]+)").ok()
        })
        .as_ref()
}

/// The outcome of a recognized `<amount> <unit> to <unit>` request.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub amount: f64,
    pub from_symbol: &'static str,
    pub result: f64,
    pub to_symbol: &'static str,
}

/// Every resolvable conversion in `text`, in order. Matches naming unknown or
/// mismatched units are skipped rather than ending the search.
pub fn find_conversions(text: &str) -> Vec<Conversion> {
    let Some(pattern) = conversion_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(text)
        .filter_map(|captures| conversion(&captures))
        .collect()
}

fn conversion(captures: &regex::Captures<'_>) -> Option<Conversion> {
    let amount = captures.get(1)?.as_str().parse::<f64>().ok()?;
    let from = lookup_unit(captures.get(2)?.as_str())?;
    let to = lookup_unit(captures.get(3)?.as_str())?;
    let result = convert(amount, from, to)?;
    Some(Conversion {
        amount,
        from_symbol: from.symbol,
        result,
        to_symbol: to.symbol,
    })
}

fn convert(amount: f64, from: Unit, to: Unit) -> Option<f64> {
    if from.dimension != to.dimension {
        return None;
    }
    if from.dimension == Dimension::Temperature {
        let celsius = match from.symbol {
            "°F" => (amount - 32.0) * 5.0 / 9.0,
            "K" => amount - 273.15,
            _ => amount,
        };
        let converted = match to.symbol {
            "°F" => celsius * 9.0 / 5.0 + 32.0,
            "K" => celsius + 273.15,
            _ => celsius,
        };
        return Some(converted);
    }
    Some(amount * from.factor / to.factor)
}
