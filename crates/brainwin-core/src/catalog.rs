use serde::Serialize;
use std::collections::HashMap;

use crate::error::BrainwinError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    OneTime,
    /// Recurring charge; the interval is provider vocabulary (`month`).
    Subscription { interval: &'static str },
}

/// A purchasable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    /// Wins credited when a one-time purchase settles.
    pub wins: Option<i64>,
    pub mode: BillingMode,
}

impl Product {
    pub fn is_subscription(&self) -> bool {
        matches!(self.mode, BillingMode::Subscription { .. })
    }

    /// Wins to credit; products without a wins amount grant nothing.
    pub fn wins_granted(&self) -> i64 {
        self.wins.unwrap_or(0)
    }
}

/// Immutable product catalog, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Catalog {
    products: HashMap<String, Product>,
}

impl Catalog {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// The two products sold by BrainWin.
    pub fn standard() -> Self {
        Self::new([
            Product {
                id: "wins-pack".to_string(),
                name: "Pacote de Wins".to_string(),
                price_cents: 1990,
                currency: "brl".to_string(),
                wins: Some(50),
                mode: BillingMode::OneTime,
            },
            Product {
                id: "brainwin-learn".to_string(),
                name: "BrainWin Learn - Assinatura Mensal".to_string(),
                price_cents: 5990,
                currency: "brl".to_string(),
                wins: Some(0),
                mode: BillingMode::Subscription { interval: "month" },
            },
        ])
    }

    pub fn get(&self, product_id: &str) -> Result<&Product, BrainwinError> {
        self.products
            .get(product_id)
            .ok_or_else(|| BrainwinError::NotFound(format!("product '{product_id}'")))
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
