//! Connectivity evaluators: hub firewall, hub-and-spoke topology, public IPs.

use serde_json::Value;

use super::{
    item_label, unsupported, u64_field, EvalOutcome, EvalOutcomeResult, EvaluatorFn, Evidence,
    Verdict,
};
use crate::signals::SignalView;
use crate::taxonomy::ControlDefinition;

const FIREWALLS: &str = "resource_graph:azure_firewall";
const VNETS: &str = "resource_graph:vnets";
const PUBLIC_IPS: &str = "resource_graph:public_ips";

/// Peerings a network needs before it counts as a hub.
const HUB_MIN_PEERINGS: u64 = 2;

pub(super) fn bindings() -> Vec<(&'static str, EvaluatorFn)> {
    vec![
        ("D01.01", hub_firewall as EvaluatorFn),
        ("D01.02", hub_spoke_topology as EvaluatorFn),
        ("D02.01", public_ip_sku as EvaluatorFn),
    ]
}

fn hub_firewall(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let firewalls = &view.require(FIREWALLS)?.items;
    if firewalls.is_empty() {
        return Ok(EvalOutcome::fail("No Azure Firewall found in visible subscriptions."));
    }
    let mut outcome = EvalOutcome::pass(format!(
        "{} Azure Firewall instance(s) deployed.",
        firewalls.len()
    ));
    for fw in firewalls {
        outcome = outcome.with_evidence(Evidence::resource(item_label(fw), "Azure Firewall"));
    }
    Ok(outcome)
}

fn hub_spoke_topology(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let vnets = &view.require(VNETS)?.items;
    if vnets.is_empty() {
        return Err(unsupported("no virtual networks in scope"));
    }
    let firewall_count = view.require(FIREWALLS)?.items.len();

    let mut hubs: Vec<&Value> = Vec::new();
    for vnet in vnets {
        if u64_field(vnet, "peering_count")? >= HUB_MIN_PEERINGS {
            hubs.push(vnet);
        }
    }

    let verdict = match (hubs.is_empty(), firewall_count) {
        (true, _) => Verdict::Fail,
        (false, 0) => Verdict::Partial,
        (false, _) => Verdict::Pass,
    };
    let reason = match verdict {
        Verdict::Pass => format!(
            "{} hub network(s) with {firewall_count} firewall(s) across {} virtual network(s).",
            hubs.len(),
            vnets.len()
        ),
        Verdict::Partial => format!(
            "{} hub network(s) found but no hub firewall inspects spoke traffic.",
            hubs.len()
        ),
        _ => format!(
            "No hub network among {} virtual network(s); spokes are not centrally peered.",
            vnets.len()
        ),
    };

    let mut outcome = EvalOutcome::new(verdict, reason);
    for hub in hubs {
        outcome = outcome.with_evidence(Evidence::resource(item_label(hub), "hub virtual network"));
    }
    Ok(outcome)
}

fn public_ip_sku(_: &ControlDefinition, view: &SignalView<'_>) -> EvalOutcomeResult {
    let ips = &view.require(PUBLIC_IPS)?.items;
    if ips.is_empty() {
        return Err(unsupported("no public IP addresses in scope"));
    }
    let basic: Vec<&Value> = ips
        .iter()
        .filter(|ip| {
            ip.get("sku")
                .and_then(Value::as_str)
                .is_some_and(|sku| sku.eq_ignore_ascii_case("basic"))
        })
        .collect();

    let (verdict, reason) = if basic.is_empty() {
        (
            Verdict::Pass,
            format!("All {} public IP address(es) use Standard SKU.", ips.len()),
        )
    } else if basic.len() < ips.len() {
        (
            Verdict::Partial,
            format!("{}/{} public IP address(es) still use Basic SKU.", basic.len(), ips.len()),
        )
    } else {
        (
            Verdict::Fail,
            format!("All {} public IP address(es) use Basic SKU.", ips.len()),
        )
    };

    let mut outcome = EvalOutcome::new(verdict, reason);
    for ip in basic {
        outcome = outcome.with_evidence(Evidence::resource(item_label(ip), "Basic SKU public IP"));
    }
    Ok(outcome)
}
