use crate::command::{arg_to_bytes, arg_to_string, wrong_arg_count};
use crate::connection::ClientState;
use crate::pubsub::PubSubBus;
use crate::resp::RespValue;

fn subscription_notice(kind: &str, channel: Option<&str>, count: usize) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(kind.as_bytes().to_vec()),
        match channel {
            Some(ch) => RespValue::bulk_string(ch.as_bytes().to_vec()),
            None => RespValue::null_bulk_string(),
        },
        RespValue::integer(count as i64),
    ])
}

/// SUBSCRIBE channel [channel ...] — one notification per channel,
/// each carrying the connection's total subscription count.
pub fn subscribe(args: &[RespValue], client: &mut ClientState, bus: &mut PubSubBus) -> RespValue {
    if args.is_empty() {
        return wrong_arg_count("subscribe");
    }

    let mut frames = Vec::new();
    for arg in args {
        if let Some(channel) = arg_to_string(arg) {
            let count = bus.subscribe(client.id, &channel, client.push_tx.clone());
            subscription_notice("subscribe", Some(&channel), count).write_to(&mut frames);
        }
    }
    RespValue::Raw(frames)
}

/// UNSUBSCRIBE [channel ...] — with no arguments, drops every
/// subscription the connection holds.
pub fn unsubscribe(args: &[RespValue], client: &mut ClientState, bus: &mut PubSubBus) -> RespValue {
    let channels: Vec<String> = if args.is_empty() {
        bus.client_channel_list(client.id)
    } else {
        args.iter().filter_map(arg_to_string).collect()
    };

    if channels.is_empty() {
        return subscription_notice("unsubscribe", None, 0);
    }

    let mut frames = Vec::new();
    for channel in &channels {
        let count = bus.unsubscribe(client.id, channel);
        subscription_notice("unsubscribe", Some(channel), count).write_to(&mut frames);
    }
    RespValue::Raw(frames)
}

/// PUBLISH channel message — returns the number of deliveries.
pub fn publish(args: &[RespValue], bus: &mut PubSubBus) -> RespValue {
    if args.len() != 2 {
        return wrong_arg_count("publish");
    }
    let channel = match arg_to_string(&args[0]) {
        Some(ch) => ch,
        None => return RespValue::integer(0),
    };
    let message = match arg_to_bytes(&args[1]) {
        Some(m) => m,
        None => return RespValue::integer(0),
    };

    RespValue::integer(bus.publish(&channel, message) as i64)
}

/// PUBSUB CHANNELS|NUMSUB|NUMPAT
pub fn pubsub(args: &[RespValue], bus: &mut PubSubBus) -> RespValue {
    if args.is_empty() {
        return wrong_arg_count("pubsub");
    }
    let sub = match arg_to_string(&args[0]) {
        Some(s) => s.to_uppercase(),
        None => return RespValue::error("ERR syntax error"),
    };

    match sub.as_str() {
        "CHANNELS" => RespValue::array(
            bus.channels()
                .into_iter()
                .map(|ch| RespValue::bulk_string(ch.into_bytes()))
                .collect(),
        ),
        "NUMSUB" => {
            let names: Vec<String> = args[1..].iter().filter_map(arg_to_string).collect();
            let mut items = Vec::with_capacity(names.len() * 2);
            for (channel, count) in bus.numsub(&names) {
                items.push(RespValue::bulk_string(channel.into_bytes()));
                items.push(RespValue::integer(count as i64));
            }
            RespValue::array(items)
        }
        // Pattern subscriptions are not supported, so the count is fixed.
        "NUMPAT" => RespValue::integer(0),
        other => RespValue::error(format!(
            "ERR Unknown PUBSUB subcommand or wrong number of arguments for '{other}'"
        )),
    }
}
