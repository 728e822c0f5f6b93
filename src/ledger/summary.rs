use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::models::{InventoryItem, Operation, OperationCategory, Order, OrderItem, OrderStatus};
use crate::utils::normalize_key;

pub const UNASSIGNED_PLOT: &str = "sin paño";
pub const UNASSIGNED_CUT: &str = "sin corte";

const TOP_PRODUCTS: usize = 5;

/// Yield rows with this subcategory record bales lost, not produced.
fn is_loss(op: &Operation) -> bool {
    op.subcategory
        .as_deref()
        .map(|s| normalize_key(s) == "perdida")
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotStock {
    pub pano_id: String,
    pub produced: Decimal,
    pub sold: Decimal,
    pub lost: Decimal,
    pub stock: Decimal,
    pub is_negative: bool,
}

impl PlotStock {
    fn finish(mut self) -> Self {
        self.stock = self.produced - self.sold - self.lost;
        self.is_negative = self.stock < Decimal::ZERO;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StockSummary {
    pub plots: Vec<PlotStock>,
    pub total: PlotStock,
}

/// Bales on hand per plot: produced − sold − lost.
pub fn stock_by_plot(ops: &[Operation]) -> StockSummary {
    let mut plots: BTreeMap<String, PlotStock> = BTreeMap::new();

    for op in ops {
        let bucket = match op.category() {
            Some(OperationCategory::Yield) | Some(OperationCategory::Sale) => {
                let key = op.pano_id.clone().unwrap_or_else(|| UNASSIGNED_PLOT.to_string());
                plots.entry(key.clone()).or_insert_with(|| PlotStock {
                    pano_id: key,
                    ..PlotStock::default()
                })
            }
            _ => continue,
        };

        match op.category() {
            Some(OperationCategory::Yield) if is_loss(op) => bucket.lost += op.quantity,
            Some(OperationCategory::Yield) => bucket.produced += op.quantity,
            Some(OperationCategory::Sale) => bucket.sold += op.quantity,
            _ => {}
        }
    }

    let plots: Vec<PlotStock> = plots.into_values().map(PlotStock::finish).collect();
    let total = plots
        .iter()
        .fold(
            PlotStock {
                pano_id: "total".to_string(),
                ..PlotStock::default()
            },
            |mut acc, p| {
                acc.produced += p.produced;
                acc.sold += p.sold;
                acc.lost += p.lost;
                acc
            },
        )
        .finish();

    StockSummary { plots, total }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CutProfit {
    pub corte_id: String,
    pub income: Decimal,
    pub expense: Decimal,
    pub profit: Decimal,
    pub bales_produced: Decimal,
    pub cost_per_bale: Option<Decimal>,
}

/// Income minus operating expense for every harvest cycle.
pub fn profit_by_cut(ops: &[Operation]) -> Vec<CutProfit> {
    let mut cuts: BTreeMap<String, CutProfit> = BTreeMap::new();

    for op in ops {
        let Some(category) = op.category() else { continue };
        if category == OperationCategory::ProfitWithdrawal {
            continue;
        }

        let key = op.corte_id.clone().unwrap_or_else(|| UNASSIGNED_CUT.to_string());
        let cut = cuts.entry(key.clone()).or_insert_with(|| CutProfit {
            corte_id: key,
            ..CutProfit::default()
        });

        match category {
            OperationCategory::Sale => cut.income += op.total_cost,
            OperationCategory::OperatingCost => cut.expense += op.total_cost,
            OperationCategory::Yield if !is_loss(op) => cut.bales_produced += op.quantity,
            _ => {}
        }
    }

    cuts.into_values()
        .map(|mut cut| {
            cut.profit = cut.income - cut.expense;
            cut.cost_per_bale = (cut.bales_produced > Decimal::ZERO).then(|| {
                (cut.expense / cut.bales_produced)
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            });
            cut
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerTotals {
    pub income: Decimal,
    pub expense: Decimal,
    pub profit: Decimal,
    pub withdrawals: Decimal,
    pub net: Decimal,
    pub outstanding_payables: Decimal,
    pub outstanding_receivables: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonthlyPoint {
    pub month: String,
    pub income: Decimal,
    pub expense: Decimal,
    pub profit: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WebSales {
    pub paid_orders: usize,
    pub pending_orders: usize,
    pub revenue: Decimal,
    pub average_order_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopProduct {
    pub title: String,
    pub quantity: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub ledger: LedgerTotals,
    pub monthly: Vec<MonthlyPoint>,
    pub web_sales: WebSales,
    pub top_products: Vec<TopProduct>,
    pub stock: PlotStock,
    pub low_stock_items: usize,
}

pub fn ledger_totals(ops: &[Operation]) -> LedgerTotals {
    let mut totals = LedgerTotals::default();

    for op in ops {
        let outstanding = (op.total_cost - op.amount_paid).max(Decimal::ZERO);
        match op.category() {
            Some(OperationCategory::Sale) => {
                totals.income += op.total_cost;
                totals.outstanding_receivables += outstanding;
            }
            Some(OperationCategory::OperatingCost) => {
                totals.expense += op.total_cost;
                totals.outstanding_payables += outstanding;
            }
            Some(OperationCategory::ProfitWithdrawal) => totals.withdrawals += op.total_cost,
            _ => {}
        }
    }

    totals.profit = totals.income - totals.expense;
    totals.net = totals.profit - totals.withdrawals;
    totals
}

fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Income / expense per calendar month, oldest first.
pub fn monthly_series(ops: &[Operation]) -> Vec<MonthlyPoint> {
    let mut months: BTreeMap<String, MonthlyPoint> = BTreeMap::new();

    for op in ops {
        let Some(category) = op.category() else { continue };
        if !matches!(category, OperationCategory::Sale | OperationCategory::OperatingCost) {
            continue;
        }
        let key = month_key(op.operation_date);
        let point = months.entry(key.clone()).or_insert_with(|| MonthlyPoint {
            month: key,
            ..MonthlyPoint::default()
        });
        if category == OperationCategory::Sale {
            point.income += op.total_cost;
        } else {
            point.expense += op.total_cost;
        }
    }

    months
        .into_values()
        .map(|mut p| {
            p.profit = p.income - p.expense;
            p
        })
        .collect()
}

fn counts_as_sale(order: &Order) -> bool {
    matches!(
        order.status.parse::<OrderStatus>(),
        Ok(OrderStatus::Paid | OrderStatus::Processing | OrderStatus::Shipped | OrderStatus::Delivered)
    )
}

pub fn web_sales(orders: &[Order]) -> WebSales {
    let mut sales = WebSales::default();

    for order in orders {
        if counts_as_sale(order) {
            sales.paid_orders += 1;
            sales.revenue += order.total_amount;
        } else if order.status == OrderStatus::Pending.as_str() {
            sales.pending_orders += 1;
        }
    }

    if sales.paid_orders > 0 {
        sales.average_order_value = (sales.revenue / Decimal::from(sales.paid_orders))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    }
    sales
}

/// Best sellers by bales sold, only counting items of orders that were paid.
pub fn top_products(orders: &[Order], items: &[OrderItem]) -> Vec<TopProduct> {
    let sold_orders: Vec<_> = orders.iter().filter(|o| counts_as_sale(o)).map(|o| o.id).collect();

    let mut by_title: HashMap<&str, TopProduct> = HashMap::new();
    for item in items.iter().filter(|i| sold_orders.contains(&i.order_id)) {
        let entry = by_title.entry(item.title.as_str()).or_insert_with(|| TopProduct {
            title: item.title.clone(),
            quantity: 0,
            revenue: Decimal::ZERO,
        });
        entry.quantity += i64::from(item.quantity);
        entry.revenue += item.line_total;
    }

    let mut ranked: Vec<TopProduct> = by_title.into_values().collect();
    ranked.sort_by(|a, b| b.quantity.cmp(&a.quantity).then_with(|| a.title.cmp(&b.title)));
    ranked.truncate(TOP_PRODUCTS);
    ranked
}

pub fn dashboard(
    ops: &[Operation],
    orders: &[Order],
    items: &[OrderItem],
    inventory: &[InventoryItem],
) -> Dashboard {
    Dashboard {
        ledger: ledger_totals(ops),
        monthly: monthly_series(ops),
        web_sales: web_sales(orders),
        top_products: top_products(orders, items),
        stock: stock_by_plot(ops).total,
        low_stock_items: inventory.iter().filter(|i| i.is_low_stock()).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn op(
        category: OperationCategory,
        sub: Option<&str>,
        qty: i64,
        total: i64,
        paid: i64,
        pano: Option<&str>,
        corte: Option<&str>,
        date: &str,
    ) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            category: category.as_str().to_string(),
            subcategory: sub.map(str::to_string),
            description: None,
            quantity: Decimal::from(qty),
            unit_cost: Decimal::ZERO,
            total_cost: Decimal::from(total),
            operation_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            pano_id: pano.map(str::to_string),
            corte_id: corte.map(str::to_string),
            amount_paid: Decimal::from(paid),
            payment_status: "pending".to_string(),
            payment_due_date: None,
            order_id: None,
            inventory_movement_id: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_ledger() -> Vec<Operation> {
        use OperationCategory::*;
        vec![
            op(Yield, Some("Cosecha"), 500, 0, 0, Some("P1"), Some("C1"), "2024-01-10"),
            op(Yield, Some("Pérdida"), 20, 0, 0, Some("P1"), Some("C1"), "2024-01-12"),
            op(Sale, None, 300, 1_950_000, 1_950_000, Some("P1"), Some("C1"), "2024-01-20"),
            op(OperatingCost, Some("Tractor"), 500, 225_000, 100_000, Some("P1"), Some("C1"), "2024-01-10"),
            op(Yield, Some("Cosecha"), 200, 0, 0, Some("P2"), Some("C2"), "2024-02-05"),
            op(Sale, None, 50, 325_000, 0, Some("P2"), Some("C2"), "2024-02-15"),
            op(OperatingCost, Some("Riego"), 4, 72_000, 72_000, Some("P2"), Some("C2"), "2024-02-01"),
            op(ProfitWithdrawal, None, 0, 500_000, 500_000, None, None, "2024-02-28"),
        ]
    }

    #[test]
    fn stock_is_produced_minus_sold_minus_lost() {
        let summary = stock_by_plot(&sample_ledger());
        let p1 = &summary.plots[0];
        assert_eq!(p1.pano_id, "P1");
        assert_eq!(p1.produced, Decimal::from(500));
        assert_eq!(p1.lost, Decimal::from(20));
        assert_eq!(p1.sold, Decimal::from(300));
        assert_eq!(p1.stock, Decimal::from(180));

        for plot in &summary.plots {
            assert_eq!(plot.stock, plot.produced - plot.sold - plot.lost);
        }
        assert_eq!(summary.total.stock, Decimal::from(180 + 150));
    }

    #[test]
    fn overselling_is_flagged() {
        use OperationCategory::*;
        let ops = vec![
            op(Yield, None, 10, 0, 0, None, None, "2024-01-01"),
            op(Sale, None, 12, 0, 0, None, None, "2024-01-02"),
        ];
        let summary = stock_by_plot(&ops);
        assert_eq!(summary.plots[0].pano_id, UNASSIGNED_PLOT);
        assert_eq!(summary.plots[0].stock, Decimal::from(-2));
        assert!(summary.plots[0].is_negative);
    }

    #[test]
    fn profit_is_income_minus_expense_per_cut() {
        let cuts = profit_by_cut(&sample_ledger());
        assert_eq!(cuts.len(), 2);

        let c1 = &cuts[0];
        assert_eq!(c1.corte_id, "C1");
        assert_eq!(c1.income, Decimal::from(1_950_000));
        assert_eq!(c1.expense, Decimal::from(225_000));
        assert_eq!(c1.profit, Decimal::from(1_725_000));
        assert_eq!(c1.bales_produced, Decimal::from(500));
        assert_eq!(c1.cost_per_bale, Some(Decimal::from(450)));

        // withdrawals never create a cut bucket
        assert!(cuts.iter().all(|c| c.corte_id != UNASSIGNED_CUT));
    }

    #[test]
    fn totals_separate_withdrawals_and_outstanding_balances() {
        let totals = ledger_totals(&sample_ledger());
        assert_eq!(totals.income, Decimal::from(2_275_000));
        assert_eq!(totals.expense, Decimal::from(297_000));
        assert_eq!(totals.profit, Decimal::from(1_978_000));
        assert_eq!(totals.withdrawals, Decimal::from(500_000));
        assert_eq!(totals.net, Decimal::from(1_478_000));
        assert_eq!(totals.outstanding_payables, Decimal::from(125_000));
        assert_eq!(totals.outstanding_receivables, Decimal::from(325_000));
    }

    #[test]
    fn monthly_series_is_chronological() {
        let series = monthly_series(&sample_ledger());
        let months: Vec<_> = series.iter().map(|p| p.month.as_str()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02"]);
        assert_eq!(series[1].income, Decimal::from(325_000));
        assert_eq!(series[1].expense, Decimal::from(72_000));
        assert_eq!(series[1].profit, Decimal::from(253_000));
    }

    fn order(status: &str, total: i64) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: None,
            guest_email: "cliente@correo.cl".to_string(),
            guest_name: "Cliente".to_string(),
            phone: None,
            shipping_address: "Camino Real 123".to_string(),
            city: None,
            region: None,
            status: status.to_string(),
            subtotal: Decimal::from(total),
            shipping_cost: Decimal::ZERO,
            total_amount: Decimal::from(total),
            mp_preference_id: None,
            mp_payment_id: None,
            tracking_note: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item(order: &Order, title: &str, qty: i32, unit: i64) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            product_id: None,
            title: title.to_string(),
            quantity: qty,
            unit_price: Decimal::from(unit),
            line_total: Decimal::from(unit * i64::from(qty)),
        }
    }

    #[test]
    fn web_sales_only_count_paid_orders() {
        let orders = vec![order("paid", 20000), order("shipped", 10000), order("pending", 5000), order("cancelled", 7000)];
        let sales = web_sales(&orders);
        assert_eq!(sales.paid_orders, 2);
        assert_eq!(sales.pending_orders, 1);
        assert_eq!(sales.revenue, Decimal::from(30000));
        assert_eq!(sales.average_order_value, Decimal::from(15000));
    }

    #[test]
    fn top_products_rank_by_quantity() {
        let paid = order("paid", 0);
        let cancelled = order("cancelled", 0);
        let items = vec![
            item(&paid, "Fardo Alfalfa", 3, 6500),
            item(&paid, "Fardo Avena", 5, 4200),
            item(&cancelled, "Fardo Alfalfa", 10, 6500),
        ];
        let top = top_products(&[paid, cancelled], &items);
        assert_eq!(top[0].title, "Fardo Avena");
        assert_eq!(top[0].quantity, 5);
        assert_eq!(top[1].title, "Fardo Alfalfa");
        assert_eq!(top[1].quantity, 3);
        assert_eq!(top[1].revenue, Decimal::from(19500));
    }
}
