//! Terminal view over a scraped ads file: search, sort and summary cards.

use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use scraper::Html;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Typed, lenient view of one ad. Every field is optional and a value of the
/// wrong type reads as absent.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AdRecord {
    #[serde(deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub price: Option<Price>,
    #[serde(deserialize_with = "lenient")]
    pub location: Option<Location>,
    #[serde(deserialize_with = "lenient")]
    pub user: Option<Seller>,
    #[serde(rename = "createdTime", deserialize_with = "lenient")]
    pub created_time: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub params: Option<Vec<Param>>,
    #[serde(rename = "isPromoted", deserialize_with = "lenient")]
    pub is_promoted: Option<bool>,
    #[serde(rename = "isHighlighted", deserialize_with = "lenient")]
    pub is_highlighted: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Price {
    #[serde(rename = "regularPrice", deserialize_with = "lenient")]
    pub regular_price: Option<RegularPrice>,
    #[serde(rename = "displayValue", deserialize_with = "lenient")]
    pub display_value: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RegularPrice {
    pub value: Option<Value>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Location {
    #[serde(rename = "cityName", deserialize_with = "lenient")]
    pub city_name: Option<String>,
    #[serde(rename = "pathName", deserialize_with = "lenient")]
    pub path_name: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Seller {
    #[serde(deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub company_name: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Param {
    #[serde(deserialize_with = "lenient")]
    pub name: Option<String>,
    pub value: Option<Value>,
}

fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw = Value::deserialize(de)?;
    Ok(serde_json::from_value(raw).ok())
}

impl AdRecord {
    /// Numeric price for sorting: `regularPrice.value`, else parsed
    /// `displayValue`, else 0.
    pub fn price_value(&self) -> f64 {
        let Some(price) = &self.price else {
            return 0.0;
        };
        let regular = price
            .regular_price
            .as_ref()
            .and_then(|r| r.value.as_ref())
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .filter(|v| *v != 0.0);
        regular
            .or_else(|| {
                price
                    .display_value
                    .as_deref()
                    .and_then(|d| normalize_price(d).0)
            })
            .unwrap_or(0.0)
    }

    fn matches(&self, needle_lower: &str) -> bool {
        let title = self.title.as_deref().unwrap_or_default().to_lowercase();
        let city = self
            .location
            .as_ref()
            .and_then(|l| l.city_name.as_deref())
            .unwrap_or_default()
            .to_lowercase();
        title.contains(needle_lower) || city.contains(needle_lower)
    }

    fn created(&self) -> &str {
        self.created_time.as_deref().unwrap_or_default()
    }

    pub fn seller(&self) -> Option<&str> {
        let user = self.user.as_ref()?;
        user.company_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(user.name.as_deref())
    }
}

/// Parses a site price label such as `12 500 zł` or `1 234,50 €`.
pub fn normalize_price(s: &str) -> (Option<f64>, Option<String>) {
    let lower = s.to_lowercase();
    let cur = if s.contains('€') || lower.contains("eur") {
        Some("EUR".to_string())
    } else if lower.contains("zł") || lower.contains("pln") {
        Some("PLN".to_string())
    } else {
        None
    };

    let kept: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return (None, cur);
    }
    let digits = if kept.contains(',') {
        kept.replace('.', "").replace(',', ".")
    } else {
        kept
    };
    (digits.parse::<f64>().ok(), cur)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Default,
    PriceLow,
    PriceHigh,
    DateNew,
    DateOld,
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "default" => SortKey::Default,
            "price-low" => SortKey::PriceLow,
            "price-high" => SortKey::PriceHigh,
            "date-new" => SortKey::DateNew,
            "date-old" => SortKey::DateOld,
            other => return Err(anyhow!("unknown sort key {other:?}")),
        })
    }
}

/// Reads an ads file. The top level must be an array.
pub fn load_ads(path: &Path) -> Result<Vec<AdRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let data: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let Value::Array(items) = data else {
        return Err(anyhow!("{} must contain an array of ads", path.display()));
    };
    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value(item).unwrap_or_default())
        .collect())
}

/// Applies the search filter, then sorts. Stable, so ties keep file order.
pub fn select<'a>(ads: &'a [AdRecord], search: Option<&str>, sort: SortKey) -> Vec<&'a AdRecord> {
    let needle = search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let mut picked: Vec<&AdRecord> = ads
        .iter()
        .filter(|ad| needle.as_deref().is_none_or(|n| ad.matches(n)))
        .collect();

    match sort {
        SortKey::Default => {}
        SortKey::PriceLow => picked.sort_by(|a, b| a.price_value().total_cmp(&b.price_value())),
        SortKey::PriceHigh => picked.sort_by(|a, b| b.price_value().total_cmp(&a.price_value())),
        SortKey::DateNew => picked.sort_by(|a, b| b.created().cmp(a.created())),
        SortKey::DateOld => picked.sort_by(|a, b| a.created().cmp(b.created())),
    }
    picked
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

fn strip_html(s: &str) -> String {
    let text: String = Html::parse_fragment(s).root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn param_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Object(o) => o
            .get("label")
            .or_else(|| o.get("key"))
            .map(param_value)
            .unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One text card per ad.
pub fn render_card(ad: &AdRecord) -> String {
    let mut out = String::new();
    let title = ad.title.as_deref().unwrap_or("No title");
    let _ = writeln!(out, "{}", truncate(title, 60));

    let price = ad
        .price
        .as_ref()
        .and_then(|p| p.display_value.as_deref())
        .unwrap_or("No price");
    let _ = writeln!(out, "  price:    {price}");

    let place = ad
        .location
        .as_ref()
        .and_then(|l| l.path_name.as_deref())
        .unwrap_or("Unknown location");
    let _ = writeln!(out, "  location: {place}");
    let _ = writeln!(out, "  seller:   {}", ad.seller().unwrap_or("Unknown seller"));

    if let Some(date) = ad
        .created_time
        .as_deref()
        .and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok())
    {
        let _ = writeln!(out, "  created:  {}", date.date());
    }

    let mut badges = Vec::new();
    if ad.is_promoted == Some(true) {
        badges.push("promoted");
    }
    if ad.is_highlighted == Some(true) {
        badges.push("highlighted");
    }
    if !badges.is_empty() {
        let _ = writeln!(out, "  badges:   {}", badges.join(", "));
    }

    if let Some(params) = ad.params.as_ref().filter(|p| !p.is_empty()) {
        let shown: Vec<String> = params
            .iter()
            .take(3)
            .map(|p| {
                format!(
                    "{}: {}",
                    p.name.as_deref().unwrap_or_default(),
                    p.value.as_ref().map(param_value).unwrap_or_default()
                )
            })
            .collect();
        let _ = writeln!(out, "  params:   {}", shown.join(" | "));
    }

    if let Some(desc) = ad.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "  {}", truncate(&strip_html(desc), 150));
    }
    if let Some(url) = ad.url.as_deref() {
        let _ = writeln!(out, "  {url}");
    }
    out
}

pub fn render(ads: &[AdRecord], search: Option<&str>, sort: SortKey, limit: Option<usize>) -> String {
    let picked = select(ads, search, sort);
    let mut out = format!("Showing {} of {} ads\n", picked.len(), ads.len());
    if picked.is_empty() {
        if let Some(term) = search.filter(|s| !s.trim().is_empty()) {
            let _ = writeln!(out, "No ads found matching '{term}'");
        }
        return out;
    }
    for ad in picked.iter().take(limit.unwrap_or(usize::MAX)) {
        out.push('\n');
        out.push_str(&render_card(ad));
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ad(v: Value) -> AdRecord {
        serde_json::from_value(v).unwrap()
    }

    fn sample() -> Vec<AdRecord> {
        vec![
            ad(json!({
                "title": "Audi A4 B8",
                "price": { "regularPrice": { "value": 32000 }, "displayValue": "32 000 zł" },
                "location": { "cityName": "Kraków", "pathName": "Kraków, Podgórze" },
                "createdTime": "2024-05-02T10:00:00+02:00"
            })),
            ad(json!({
                "title": "Fiat Panda",
                "price": { "displayValue": "8 499,99 zł" },
                "location": { "cityName": "Gdańsk" },
                "createdTime": "2024-06-11T08:30:00Z"
            })),
            ad(json!({
                "title": "Opel Astra",
                "location": { "cityName": "Warszawa" },
                "createdTime": "2023-12-24T18:00:00+01:00"
            })),
        ]
    }

    fn titles(ads: Vec<&AdRecord>) -> Vec<&str> {
        ads.iter().map(|a| a.title.as_deref().unwrap()).collect()
    }

    #[test]
    fn polish_price_labels() {
        assert_eq!(normalize_price("12 500 zł"), (Some(12500.0), Some("PLN".into())));
        assert_eq!(normalize_price("1 234,50 zł").0, Some(1234.5));
        assert_eq!(normalize_price("2.500,00 €"), (Some(2500.0), Some("EUR".into())));
        assert_eq!(normalize_price("Zamienię").0, None);
    }

    #[test]
    fn price_prefers_regular_value() {
        let ads = sample();
        assert_eq!(ads[0].price_value(), 32000.0);
        assert_eq!(ads[1].price_value(), 8499.99);
        assert_eq!(ads[2].price_value(), 0.0);
    }

    #[test]
    fn sorts_by_price_and_date() {
        let ads = sample();
        assert_eq!(
            titles(select(&ads, None, SortKey::PriceLow)),
            ["Opel Astra", "Fiat Panda", "Audi A4 B8"]
        );
        assert_eq!(
            titles(select(&ads, None, SortKey::PriceHigh)),
            ["Audi A4 B8", "Fiat Panda", "Opel Astra"]
        );
        assert_eq!(
            titles(select(&ads, None, SortKey::DateOld)),
            ["Opel Astra", "Audi A4 B8", "Fiat Panda"]
        );
        assert_eq!(
            titles(select(&ads, None, SortKey::Default)),
            ["Audi A4 B8", "Fiat Panda", "Opel Astra"]
        );
    }

    #[test]
    fn search_matches_title_or_city() {
        let ads = sample();
        assert_eq!(titles(select(&ads, Some("gdań"), SortKey::Default)), ["Fiat Panda"]);
        assert_eq!(titles(select(&ads, Some("ASTRA"), SortKey::Default)), ["Opel Astra"]);
        assert!(select(&ads, Some("tesla"), SortKey::Default).is_empty());
    }

    #[test]
    fn mistyped_fields_read_as_absent() {
        let rec = ad(json!({ "title": 5, "isPromoted": "yes", "location": "Kraków", "url": "https://x" }));
        assert!(rec.title.is_none());
        assert!(rec.is_promoted.is_none());
        assert!(rec.location.is_none());
        assert_eq!(rec.url.as_deref(), Some("https://x"));
    }

    #[test]
    fn card_shows_badges_params_and_clean_description() {
        let rec = ad(json!({
            "title": "Toyota Corolla",
            "user": { "name": "Jan", "company_name": "Auto-Handel Sp. z o.o." },
            "createdTime": "2024-05-02T10:00:00+02:00",
            "isPromoted": true,
            "params": [
                { "name": "Rok produkcji", "value": { "key": "2015", "label": "2015" } },
                { "name": "Przebieg", "value": "180 000 km" },
                { "name": "Paliwo", "value": { "label": "Benzyna" } },
                { "name": "Kolor", "value": "Czarny" }
            ],
            "description": "<p>Stan <b>bardzo dobry</b></p><br/>Polecam",
            "url": "https://www.olx.pl/d/oferta/toyota"
        }));
        let card = render_card(&rec);
        assert!(card.contains("seller:   Auto-Handel Sp. z o.o."));
        assert!(card.contains("created:  2024-05-02"));
        assert!(card.contains("badges:   promoted"));
        assert!(card.contains("Rok produkcji: 2015 | Przebieg: 180 000 km | Paliwo: Benzyna"));
        assert!(!card.contains("Kolor"));
        assert!(card.contains("Stan bardzo dobry Polecam") || card.contains("Stan bardzo dobryPolecam"));
        assert!(!card.contains("<b>"));
    }

    #[test]
    fn render_reports_counts() {
        let ads = sample();
        let out = render(&ads, Some("nothing"), SortKey::Default, None);
        assert!(out.starts_with("Showing 0 of 3 ads"));
        assert!(out.contains("No ads found matching 'nothing'"));
        let out = render(&ads, None, SortKey::Default, Some(1));
        assert!(out.contains("Audi A4 B8") && !out.contains("Fiat Panda"));
    }

    #[test]
    fn load_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ads.json");
        std::fs::write(&path, r#"{"ads": []}"#).unwrap();
        let err = load_ads(&path).unwrap_err();
        assert!(err.to_string().contains("array of ads"));

        std::fs::write(&path, r#"[{"title":"a"}, 7]"#).unwrap();
        let ads = load_ads(&path).unwrap();
        assert_eq!(ads.len(), 2);
        assert!(ads[1].title.is_none());
    }
}
