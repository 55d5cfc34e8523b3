//! The negotiation demo: one seller, two buyers, one item.
//!
//! `offer` and `buy` are scenario actions layered on the built-in catalog.
//! The offline responder plays all three roles without a provider, so the
//! whole runtime can be exercised on a laptop with no network.

use llsim_agent::action::{arg_f64, ActionContext, ActionHandler};
use llsim_agent::{ActionCatalog, AgentSpec, InternalState, Message, ModelConfig};
use llsim_llm::{
    BackendRequest, BackendSelection, Error, Result, RetryPolicy, Role, ScriptedBackend,
};
use serde_json::{json, Map, Value};

use crate::scenario::Scenario;

/// Put the item on the board at a price no lower than `min_price`
pub struct Offer;

impl ActionHandler for Offer {
    fn name(&self) -> &str {
        "offer"
    }

    fn description(&self) -> &str {
        "Offer the item at a price. args: {\"price\": <number>}"
    }

    fn apply(&self, ctx: &mut ActionContext<'_>, args: &Map<String, Value>) -> Result<String> {
        let price = arg_f64(self.name(), args, "price")?;
        if ctx.env.board_get("sold").is_some() {
            return Err(Error::action_failed(self.name(), "the item is already sold"));
        }
        if let Some(min) = ctx.state.get_f64("min_price") {
            if price < min {
                return Err(Error::action_failed(
                    self.name(),
                    format!("{} is below the minimum price {}", price, min),
                ));
            }
        }

        ctx.env.post(
            "offer",
            json!({ "seller": ctx.agent_name, "price": price, "step": ctx.step }),
        );
        ctx.state.insert("last_offer", price);
        Ok(format!("offered at {}", price))
    }
}

/// Accept the offer on the board if it fits the budget
pub struct Buy;

impl ActionHandler for Buy {
    fn name(&self) -> &str {
        "buy"
    }

    fn description(&self) -> &str {
        "Accept the current offer on the board. args: {}"
    }

    fn apply(&self, ctx: &mut ActionContext<'_>, _args: &Map<String, Value>) -> Result<String> {
        if ctx.state.get("bought_at").is_some() {
            return Err(Error::action_failed(self.name(), "you already bought the item"));
        }
        let offer = ctx
            .env
            .board_get("offer")
            .cloned()
            .ok_or_else(|| Error::action_failed(self.name(), "no offer on the table"))?;
        let price = offer.get("price").and_then(Value::as_f64).unwrap_or(f64::MAX);
        let budget = ctx.state.get_f64("budget").unwrap_or(0.0);
        if price > budget {
            return Err(Error::action_failed(
                self.name(),
                format!("price {} is over the budget {}", price, budget),
            ));
        }

        ctx.state.insert("budget", budget - price);
        ctx.state.insert("bought_at", price);
        ctx.env.unpost("offer");
        ctx.env.post(
            "sold",
            json!({ "buyer": ctx.agent_name, "price": price, "step": ctx.step }),
        );

        let seller = offer.get("seller").and_then(Value::as_str).and_then(|name| ctx.env.resolve(name));
        if let Some(seller) = seller {
            ctx.env.send(Message {
                step: ctx.step,
                from: ctx.agent_id,
                from_name: ctx.agent_name.to_string(),
                to: seller,
                content: format!("I bought the item at {}", price),
            });
        }
        Ok(format!("bought at {}", price))
    }
}

/// Built-in actions plus `offer` and `buy`
pub fn catalog() -> ActionCatalog {
    ActionCatalog::builtin().with(Offer).with(Buy)
}

const SELLER_ROLE: &str = "You are a seller at a flea market with one vintage bicycle to sell. \
Get the best price you can, but never offer below your min_price. Lower your price if nobody buys.";

const BUYER_ROLE: &str = "You are a buyer at a flea market looking for a vintage bicycle. \
Never pay more than your budget. Buy when the offer fits; otherwise tell the seller what you can pay.";

/// The seller/two-buyer scenario
pub fn demo_scenario(ticks: u64, backend: BackendSelection) -> Scenario {
    let seller = AgentSpec::new("seller", SELLER_ROLE, backend.clone())
        .with_state(InternalState::new().with("min_price", 60))
        .with_actions(["offer", "speak_to"]);
    let buyer = |name: &str, budget: u64| {
        AgentSpec::new(name, BUYER_ROLE, backend.clone())
            .with_state(InternalState::new().with("budget", budget))
            .with_actions(["buy", "speak_to"])
    };

    Scenario {
        name: Some("flea-market".into()),
        ticks,
        model: ModelConfig::default(),
        retry: RetryPolicy::default(),
        agents: vec![seller, buyer("buyer-1", 100), buyer("buyer-2", 70)],
    }
}

// ============================================================================
// Offline play
// ============================================================================

/// A scripted backend answering with well-formed plans for the demo roles
pub fn offline_backend() -> ScriptedBackend {
    ScriptedBackend::new()
        .with_model("offline")
        .with_responder(offline_reply)
}

/// First number after `key` in `text`
fn number_after(text: &str, key: &str) -> Option<f64> {
    let rest = &text[text.find(key)? + key.len()..];
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

fn reply(reasoning: &str, name: &str, args: Value) -> String {
    format!(
        "<reasoning>{}</reasoning>\n<action>{}</action>",
        reasoning,
        json!({ "name": name, "args": args })
    )
}

/// Plays whichever demo role the request's action list implies
pub fn offline_reply(request: &BackendRequest) -> String {
    let user = request.content_of(Role::User);
    let observation = user.split("## Memory").next().unwrap_or(&user);
    let offer_line = observation
        .lines()
        .find(|line| line.trim_start().starts_with("offer: {"));
    let sold = observation.lines().any(|line| line.trim_start().starts_with("sold: {"));

    if user.contains("- offer:") {
        if sold {
            return reply("The bicycle is sold. Nothing left to do.", "noop", json!({}));
        }
        let step = number_after(observation, "Step:").unwrap_or(1.0);
        let floor = number_after(observation, "min_price:").unwrap_or(0.0);
        let price = (100.0 - 15.0 * (step - 1.0)).max(floor);
        return reply(
            &format!("Nobody has bought yet. I will ask {} this round.", price),
            "offer",
            json!({ "price": price }),
        );
    }

    if user.contains("- buy:") {
        if observation.contains("bought_at:") || sold {
            return reply("The deal is done.", "noop", json!({}));
        }
        let budget = number_after(observation, "budget:").unwrap_or(0.0);
        return match offer_line.and_then(|line| number_after(line, "\"price\":")) {
            Some(price) if price <= budget => reply(
                &format!("The offer of {} fits my budget of {}.", price, budget),
                "buy",
                json!({}),
            ),
            Some(price) => reply(
                &format!("{} is more than my budget of {}.", price, budget),
                "speak_to",
                json!({ "to": "seller", "message": format!("Too expensive. I can pay {}.", budget) }),
            ),
            None => reply("No offer yet. I will wait.", "noop", json!({})),
        };
    }

    reply("Nothing to do.", "noop", json!({}))
}
