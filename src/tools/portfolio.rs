//! Sample portfolio tools
//!
//! Three data-fetch tools over a static portfolio snapshot, used by the
//! portfolio assistant and by the tool-routing tests.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::tools::registry::ToolDescriptor;

pub const PORTFOLIO_SYSTEM_PROMPT: &str = "You are a portfolio assistant. \
Use get_holdings for questions about positions, asset classes or regions, \
get_transactions for questions about buys, sells or transfers, and \
get_portfolio_value for questions about total value or its history. \
Only call the tools a question needs, then answer concisely.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub asset_class: String,
    pub region: String,
    pub quantity: f64,
    pub market_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub symbol: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioValuePoint {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioData {
    pub holdings: Vec<Holding>,
    pub transactions: Vec<Transaction>,
    pub portfolio_value: Vec<PortfolioValuePoint>,
}

pub fn load_portfolio_data(json: &str) -> Result<PortfolioData> {
    serde_json::from_str(json).map_err(|e| anyhow!("Invalid portfolio data: {}", e))
}

/// The three portfolio tools, in the order get_holdings, get_transactions,
/// get_portfolio_value
pub fn portfolio_tools(data: Arc<PortfolioData>) -> Vec<Arc<ToolDescriptor>> {
    let holdings = Arc::clone(&data);
    let transactions = Arc::clone(&data);
    let values = data;

    vec![
        Arc::new(ToolDescriptor::new(
            "get_holdings",
            "List portfolio holdings, optionally filtered by asset class or region",
            json!({
                "type": "object",
                "properties": {
                    "asset_class": {
                        "type": "string",
                        "description": "Asset class filter, e.g. equity or fixed income"
                    },
                    "region": {
                        "type": "string",
                        "description": "Region filter, e.g. United States or International"
                    }
                }
            }),
            move |args| get_holdings(&holdings, args),
        )),
        Arc::new(ToolDescriptor::new(
            "get_transactions",
            "List account transactions, optionally filtered by type or minimum amount",
            json!({
                "type": "object",
                "properties": {
                    "type": {"type": "string", "description": "BUY, SELL, DIVIDEND or TRANSFER"},
                    "min_amount": {"type": "number", "description": "Minimum absolute amount"},
                    "limit": {"type": "integer", "description": "Most recent N transactions"}
                }
            }),
            move |args| get_transactions(&transactions, args),
        )),
        Arc::new(ToolDescriptor::new(
            "get_portfolio_value",
            "Total portfolio market value over time",
            json!({"type": "object", "properties": {}}),
            move |_| Ok(serde_json::to_value(&values.portfolio_value)?),
        )),
    ]
}

fn matches_filter(value: &str, filter: Option<&str>) -> bool {
    filter
        .map(|f| value.to_lowercase().contains(&f.to_lowercase()))
        .unwrap_or(true)
}

fn get_holdings(data: &PortfolioData, args: &Value) -> Result<Value> {
    let asset_class = args.get("asset_class").and_then(|v| v.as_str());
    let region = args.get("region").and_then(|v| v.as_str());

    let selected: Vec<&Holding> = data
        .holdings
        .iter()
        .filter(|h| matches_filter(&h.asset_class, asset_class))
        .filter(|h| matches_filter(&h.region, region))
        .collect();
    Ok(serde_json::to_value(selected)?)
}

fn get_transactions(data: &PortfolioData, args: &Value) -> Result<Value> {
    let kind = args.get("type").and_then(|v| v.as_str());
    let min_amount = args.get("min_amount").and_then(|v| v.as_f64());
    let limit = args.get("limit").and_then(|v| v.as_u64()).map(|l| l as usize);

    let mut selected: Vec<&Transaction> = data
        .transactions
        .iter()
        .filter(|t| kind.map(|k| t.kind.eq_ignore_ascii_case(k)).unwrap_or(true))
        .filter(|t| min_amount.map(|m| t.amount.abs() >= m).unwrap_or(true))
        .collect();
    // ISO dates sort lexicographically
    selected.sort_by(|a, b| b.date.cmp(&a.date));
    if let Some(limit) = limit {
        selected.truncate(limit);
    }
    Ok(serde_json::to_value(selected)?)
}
