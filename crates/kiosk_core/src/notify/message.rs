//! Localized notification texts for the network channels.
//!
//! # Invariants
//! - Languages starting with `de` get German text; every other code falls
//!   back to English.
//! - Amounts always render with two decimals.
//! - User-provided strings are HTML-escaped in the HTML part only.

use crate::schedule::summary::MonthlySummary;
use rust_decimal::Decimal;
use std::fmt::Write as _;

/// Subject used by `send_message` when the caller passes none.
pub const DEFAULT_SUBJECT: &str = "Nachricht";

/// One notification rendered as subject, plain text and HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    English,
    German,
}

impl Language {
    fn from_code(code: &str) -> Self {
        if code.trim().to_ascii_lowercase().starts_with("de") {
            Self::German
        } else {
            Self::English
        }
    }
}

pub fn low_balance(balance: Decimal, language: &str) -> RenderedMessage {
    let balance = money(balance);
    let (subject, line) = match Language::from_code(language) {
        Language::German => (
            "Niedriges Guthaben",
            format!("Dein Guthaben ist niedrig: {balance} EUR. Bitte lade es bald wieder auf."),
        ),
        Language::English => (
            "Low balance",
            format!("Your balance is low: {balance} EUR. Please top it up soon."),
        ),
    };
    RenderedMessage {
        subject: subject.to_string(),
        html: format!("<p>{}</p>", escape_html(&line)),
        text: line,
    }
}

pub fn low_stock(product_name: &str, available_quantity: u32, language: &str) -> RenderedMessage {
    let (subject, line) = match Language::from_code(language) {
        Language::German => (
            "Produkt fast ausverkauft",
            format!("{product_name} ist fast ausverkauft: noch {available_quantity} Stück vorrätig."),
        ),
        Language::English => (
            "Product running low",
            format!("{product_name} is running low: {available_quantity} left in stock."),
        ),
    };
    RenderedMessage {
        subject: subject.to_string(),
        html: format!("<p>{}</p>", escape_html(&line)),
        text: line,
    }
}

pub fn monthly_summary(summary: &MonthlySummary, language: &str) -> RenderedMessage {
    let lang = Language::from_code(language);
    let (subject, period, spent, count, header, footer) = match lang {
        Language::German => (
            "Deine Monatsübersicht",
            "Zeitraum",
            "Ausgegeben",
            "Einkäufe",
            ["Produkt", "Menge", "Summe"],
            "Danke, dass du den Kiosk nutzt.",
        ),
        Language::English => (
            "Your monthly summary",
            "Period",
            "Total spent",
            "Purchases",
            ["Product", "Quantity", "Total"],
            "Thanks for using the kiosk.",
        ),
    };
    let period_value = format!(
        "{} - {}",
        summary.period_start.format("%d.%m.%Y"),
        summary.period_end.format("%d.%m.%Y")
    );
    let spent_value = format!("{} EUR", money(summary.total_spent));

    let mut text = format!(
        "{period}: {period_value}\n{spent}: {spent_value}\n{count}: {}\n\n{} | {} | {}\n",
        summary.transaction_count, header[0], header[1], header[2]
    );
    let mut html = format!(
        "<p>{period}: {period_value}<br>{spent}: {spent_value}<br>{count}: {}</p>\
         <table><tr><th>{}</th><th>{}</th><th>{}</th></tr>",
        summary.transaction_count, header[0], header[1], header[2]
    );
    for (name, product) in &summary.products {
        let cost = money(product.total_cost);
        let _ = writeln!(text, "{name} | {} | {cost} EUR", product.quantity);
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{cost} EUR</td></tr>",
            escape_html(name),
            product.quantity
        );
    }
    let _ = write!(text, "\n{footer}");
    let _ = write!(html, "</table><p>{footer}</p>");

    RenderedMessage {
        subject: subject.to_string(),
        text,
        html,
    }
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{low_balance, low_stock, monthly_summary};
    use crate::schedule::summary::{MonthlySummary, ProductSummary};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[test]
    fn low_balance_uses_two_decimals_in_both_languages() {
        let english = low_balance(dec!(2.5), "en");
        assert_eq!(english.subject, "Low balance");
        assert!(english.text.contains("2.50 EUR"));

        let german = low_balance(dec!(2.5), "de_DE");
        assert_eq!(german.subject, "Niedriges Guthaben");
        assert!(german.html.contains("2.50 EUR"));
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert_eq!(low_stock("Mate", 2, "fr").subject, "Product running low");
    }

    #[test]
    fn product_names_are_escaped_in_html_only() {
        let message = low_stock("Salt & <Pepper>", 1, "en");
        assert!(message.text.starts_with("Salt & <Pepper>"));
        assert!(message.html.contains("Salt &amp; &lt;Pepper&gt;"));
    }

    #[test]
    fn summary_lists_every_product() {
        let summary = MonthlySummary {
            period_start: NaiveDate::from_ymd_opt(2024, 2, 1).expect("date"),
            period_end: NaiveDate::from_ymd_opt(2024, 2, 29).expect("date"),
            total_spent: dec!(7.5),
            transaction_count: 3,
            products: BTreeMap::from([
                (
                    "Club-Mate".to_string(),
                    ProductSummary {
                        quantity: 2,
                        total_cost: dec!(3),
                    },
                ),
                (
                    "Pretzel".to_string(),
                    ProductSummary {
                        quantity: 3,
                        total_cost: dec!(4.5),
                    },
                ),
            ]),
        };

        let message = monthly_summary(&summary, "de");

        assert_eq!(message.subject, "Deine Monatsübersicht");
        assert!(message.text.contains("01.02.2024 - 29.02.2024"));
        assert!(message.text.contains("Ausgegeben: 7.50 EUR"));
        assert!(message.text.contains("Club-Mate | 2 | 3.00 EUR"));
        assert!(message.text.contains("Pretzel | 3 | 4.50 EUR"));
        assert_eq!(message.html.matches("<tr>").count(), 3);
    }
}
