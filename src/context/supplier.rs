//! Business-context rendering for supplier dashboard payloads
//!
//! The dashboard posts raw supplier data alongside each query. This turns it
//! into the compact Spanish summary the assistant prompt expects. The
//! assembler never looks inside the result.

use std::fmt::Write as _;

use serde_json::Value;

/// Role assumed when the caller doesn't send one
pub const DEFAULT_USER_ROLE: &str = "admin";

/// Keys that mark a payload as supplier dashboard data
const SUPPLIER_KEYS: &[&str] = &["business_clients", "orders", "settlements", "credit_requests"];

/// Render the business-context section text for one request
///
/// A string context passes through untouched, supplier data is summarized,
/// and any other JSON is pretty-printed. Returns `None` when there is nothing
/// to render.
#[must_use]
pub fn render_business_context(role: Option<&str>, context: Option<&Value>) -> Option<String> {
    let body = match context {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Some(value) if is_supplier_data(value) => Some(summarize_supplier_data(value)),
        Some(value) => serde_json::to_string_pretty(value).ok(),
    };

    let role = role.map(str::trim).filter(|r| !r.is_empty());
    match (role, body) {
        (None, None) => None,
        (Some(role), None) => Some(format!("ROL DEL USUARIO: {role}")),
        (role, Some(body)) => Some(format!(
            "ROL DEL USUARIO: {}\n\n{body}",
            role.unwrap_or(DEFAULT_USER_ROLE)
        )),
    }
}

/// Whether `value` looks like supplier dashboard data
#[must_use]
pub fn is_supplier_data(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| SUPPLIER_KEYS.iter().any(|k| obj.contains_key(*k)))
}

/// Summarize supplier data: clients grouped by approval status, then totals
#[must_use]
pub fn summarize_supplier_data(data: &Value) -> String {
    let clients = array(data, "business_clients");
    let orders = array(data, "orders");
    let settlements = array(data, "settlements");
    let credit_requests = array(data, "credit_requests");

    // Grouped in first-seen order
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for client in clients {
        let status = client
            .get("approval_status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let name = client
            .get("company_name")
            .and_then(Value::as_str)
            .unwrap_or("Sin nombre");

        if let Some((_, names)) = groups.iter_mut().find(|(s, _)| *s == status) {
            names.push(name);
        } else {
            groups.push((status, vec![name]));
        }
    }

    let mut summary = String::from(
        "RESUMEN DEL PROGRAMA DE CRÉDITO:\n\nCLIENTES POR STATUS DE APROBACIÓN:\n",
    );
    for (status, names) in &groups {
        let _ = writeln!(summary, "{} ({}):", status_heading(status), names.len());
        for name in names {
            let _ = writeln!(summary, "  • {name}");
        }
        summary.push('\n');
    }

    let revenue: f64 = settlements
        .iter()
        .filter_map(|s| s.get("amount").and_then(Value::as_f64))
        .sum();

    let _ = write!(
        summary,
        "MÉTRICAS GENERALES:\n\
         - Total clientes: {}\n\
         - Ingresos totales: {}\n\
         - Órdenes procesadas: {}\n\
         - Solicitudes de crédito: {}",
        clients.len(),
        format_currency(revenue),
        orders.len(),
        credit_requests.len(),
    );

    summary
}

fn array<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn status_heading(status: &str) -> String {
    match status {
        "active" => "ACTIVOS".to_string(),
        "pending" => "PENDIENTES".to_string(),
        "rejected" => "RECHAZADOS".to_string(),
        "suspended" => "SUSPENDIDOS".to_string(),
        other => other.to_uppercase(),
    }
}

/// Format an amount as `$1,234.56`
#[must_use]
pub fn format_currency(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{cents}")
}
