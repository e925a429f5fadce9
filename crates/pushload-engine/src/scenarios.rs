//! Built-in push scenarios.
//!
//! These are runnable from the command line, e.g.
//!
//! ```text
//! scenario --websocket_url wss://push.example.com scenarios:basic
//! ```
//!
//! Arguments reach a scenario through [`ScenarioArgs`]: positionally from
//! the test plan, or by name from JSON-object fields
//! (`scenario ... reconnect_forever 0 1` is `reconnect_delay=0, run_once=1`).

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::client::ScenarioClient;
use crate::registry::{ScenarioRegistry, ScenarioSpec};
use crate::testplan::ScenarioArgs;
use crate::util::{bad_push_endpoint, random_channel_id, random_data};
use crate::ScenarioError;

/// Data sent by `basic`; padded to a multiple of four so it survives a
/// base64url round trip unchanged.
const BASIC_DATA: &str = "aLongStringOfEncryptedThings";

pub fn register_builtins(registry: &mut ScenarioRegistry) {
    registry.register(ScenarioSpec::new("scenarios:basic", basic));
    registry.register(ScenarioSpec::new(
        "scenarios:connect_and_idle_forever",
        connect_and_idle_forever,
    ));
    registry.register(ScenarioSpec::new(
        "scenarios:reconnect_forever",
        reconnect_forever,
    ));
    registry.register(ScenarioSpec::new(
        "scenarios:register_forever",
        register_forever,
    ));
    registry.register(ScenarioSpec::new(
        "scenarios:notification_forever",
        notification_forever,
    ));
    registry.register(ScenarioSpec::new(
        "scenarios:notification_forever_stored",
        notification_forever_stored,
    ));
    registry.register(ScenarioSpec::new(
        "scenarios:notification_forever_direct_store",
        notification_forever_direct_store,
    ));
    registry.register(ScenarioSpec::new(
        "scenarios:notification_forever_unsubscribed",
        notification_forever_unsubscribed,
    ));
    registry.register(ScenarioSpec::new(
        "scenarios:notification_forever_bad_tokens",
        notification_forever_bad_tokens,
    ));
    registry.register(ScenarioSpec::new(
        "scenarios:notification_forever_bad_endpoints",
        notification_forever_bad_endpoints,
    ));
    registry.register(ScenarioSpec::new("scenarios:api_test", api_test));
    registry.register(ScenarioSpec::new("scenarios:loadtest", loadtest));
}

/// Connect, send one notification round trip, disconnect.
async fn basic(client: ScenarioClient, args: ScenarioArgs) -> Result<(), ScenarioError> {
    client.connect().await?;
    client.hello(None).await?;

    // A restricted channel would carry the application server public key.
    let reg = client
        .register_with_key(&random_channel_id(), args.get_str("vapid_key"))
        .await?;
    client.timer_start("update.latency").await?;

    let data = URL_SAFE_NO_PAD
        .decode(BASIC_DATA)
        .map_err(|e| ScenarioError::failed(format!("bad test payload: {e}")))?;
    let delivery = client
        .send_notification(&reg.push_endpoint, Some(data), 60, args.vapid_claims())
        .await?;
    let response =
        delivery.map_err(|e| ScenarioError::failed(format!("notification delivery failed: {e}")))?;
    if response.status != 201 {
        return Err(ScenarioError::failed(format!(
            "expected 201 from endpoint, got {}",
            response.status
        )));
    }
    if !response.body.is_empty() {
        return Err(ScenarioError::failed("response content wasn't empty"));
    }
    client.counter("notification.sent", 1).await?;

    let notification = client
        .expect_notification(&reg.channel_id, Duration::from_secs(5))
        .await?
        .ok_or_else(|| ScenarioError::failed("notification never arrived"))?;

    // The server does not touch the data; it must round-trip exactly.
    if notification.data.as_deref() != Some(BASIC_DATA) {
        return Err(ScenarioError::failed("did not get back expected data"));
    }

    client.counter("notification.received", 1).await?;
    client.timer_end("update.latency").await?;
    tracing::debug!(channel = %notification.channel_id, version = %notification.version, "got notification");

    client
        .ack(&notification.channel_id, &notification.version)
        .await?;
    client.counter("notification.ack", 1).await?;

    client.unregister(&reg.channel_id).await?;
    client.disconnect().await?;
    Ok(())
}

/// Connect and hold the connection open forever.
async fn connect_and_idle_forever(
    client: ScenarioClient,
    _args: ScenarioArgs,
) -> Result<(), ScenarioError> {
    client.connect().await?;
    client.hello(None).await?;
    loop {
        client.wait_secs(100).await?;
    }
}

/// Notification round trips with a disconnect/reconnect each cycle.
async fn reconnect_forever(
    client: ScenarioClient,
    args: ScenarioArgs,
) -> Result<(), ScenarioError> {
    let reconnect_delay = args.get_u64(0, "reconnect_delay", 30);
    let run_once = args.get_flag(1, "run_once");

    client.connect().await?;
    let hello = client.hello(None).await?;
    let uaid = hello.uaid;
    let reg = client.register(&random_channel_id()).await?;

    loop {
        let data = random_data(2048, 4096);
        let length = data.len() as i64;
        client.timer_start("update.latency").await?;
        let _ = client
            .send_notification(&reg.push_endpoint, Some(data), 60, None)
            .await?;
        client.counter("notification.throughput.bytes", length).await?;
        client.counter("notification.sent", 1).await?;
        let notification = client
            .expect_notification(&reg.channel_id, Duration::from_secs(5))
            .await?;
        client.counter("notification.received", 1).await?;
        let notification =
            notification.ok_or_else(|| ScenarioError::failed("notification never arrived"))?;
        client
            .ack(&notification.channel_id, &notification.version)
            .await?;
        client.counter("notification.ack", 1).await?;
        client.timer_end("update.latency").await?;
        client.wait_secs(reconnect_delay).await?;
        client.disconnect().await?;

        match client.connect().await {
            Ok(()) => {
                let hello = client.hello(Some(&uaid)).await?;
                if hello.uaid != uaid {
                    return Err(ScenarioError::failed("uaid changed across reconnect"));
                }
            }
            Err(e) => {
                // Reconnects can race server-side connection cleanup; give
                // up on this client rather than failing the whole run.
                tracing::warn!("reconnect failed: {e}");
                break;
            }
        }

        if run_once {
            client.unregister(&reg.channel_id).await?;
            client.disconnect().await?;
            break;
        }
    }
    Ok(())
}

/// A new subscription every cycle.
async fn register_forever(client: ScenarioClient, args: ScenarioArgs) -> Result<(), ScenarioError> {
    let reg_delay = args.get_u64(0, "reg_delay", 30);
    let run_once = args.get_flag(1, "run_once");

    client.connect().await?;
    client.hello(None).await?;
    loop {
        let reg = client.register(&random_channel_id()).await?;
        client.wait_secs(reg_delay).await?;
        if run_once {
            client.unregister(&reg.channel_id).await?;
            client.disconnect().await?;
            break;
        }
    }
    Ok(())
}

/// Notification round trips on a held connection.
async fn notification_forever(
    client: ScenarioClient,
    args: ScenarioArgs,
) -> Result<(), ScenarioError> {
    let notif_delay = args.get_u64(0, "notif_delay", 30);
    let run_once = args.get_flag(1, "run_once");
    let claims = args.vapid_claims();

    client.connect().await?;
    client.hello(None).await?;
    let reg = client.register(&random_channel_id()).await?;

    loop {
        let data = random_data(2048, 4096);
        let length = data.len() as i64;
        client.timer_start("update.latency").await?;
        let _ = client
            .send_notification(&reg.push_endpoint, Some(data), 60, claims.clone())
            .await?;
        client.counter("notification.throughput.bytes", length).await?;
        client.counter("notification.sent", 1).await?;
        let notification = client
            .expect_notification(&reg.channel_id, Duration::from_secs(5))
            .await?;
        client.counter("notification.received", 1).await?;
        client.timer_end("update.latency").await?;
        let notification =
            notification.ok_or_else(|| ScenarioError::failed("notification never arrived"))?;
        client
            .ack(&notification.channel_id, &notification.version)
            .await?;
        client.counter("notification.ack", 1).await?;
        client.wait_secs(notif_delay).await?;

        if run_once {
            client.unregister(&reg.channel_id).await?;
            client.disconnect().await?;
            break;
        }
    }
    Ok(())
}

/// Store a batch while disconnected, reconnect, drain it.
async fn notification_forever_stored(
    client: ScenarioClient,
    args: ScenarioArgs,
) -> Result<(), ScenarioError> {
    let qty_stored = args.get_u64(0, "qty_stored", 32);
    let ttl = args.get_u64(1, "ttl", 300) as u32;
    let notif_delay = args.get_u64(2, "notif_delay", 30);
    let run_once = args.get_flag(3, "run_once");

    client.connect().await?;
    let hello = client.hello(None).await?;
    let uaid = hello.uaid;
    let reg = client.register(&random_channel_id()).await?;
    client.disconnect().await?;

    loop {
        let data = random_data(2048, 4096);
        let length = data.len() as i64;

        for _ in 0..qty_stored {
            let _ = client
                .send_notification(&reg.push_endpoint, Some(data.clone()), ttl, None)
                .await?;
            client.counter("notification.throughput.bytes", length).await?;
            client.counter("notification.sent", 1).await?;
        }

        client.wait_secs(5).await?;
        client.connect().await?;
        let hello = client.hello(Some(&uaid)).await?;
        if hello.uaid != uaid {
            return Err(ScenarioError::failed("uaid changed across reconnect"));
        }

        // Drain everything the server stored while we were away.
        let mut message_ids: Vec<String> = Vec::new();
        loop {
            let notification = client
                .expect_notification(&reg.channel_id, Duration::from_secs(2))
                .await?;
            if let Some(notification) = notification {
                client.counter("notification.received", 1).await?;
                message_ids.push(notification.version);
            }
            if message_ids.is_empty() {
                break;
            }
            while let Some(version) = message_ids.pop() {
                client.ack(&reg.channel_id, &version).await?;
                client.counter("notification.ack", 1).await?;
            }
        }

        if run_once {
            client.unregister(&reg.channel_id).await?;
            client.disconnect().await?;
            break;
        }
        client.disconnect().await?;
        client.wait_secs(notif_delay).await?;
    }
    Ok(())
}

/// Direct delivery followed by stored redelivery: receive a notification
/// without acking it, drop the connection, and pick the same message up
/// again after reconnecting.
async fn notification_forever_direct_store(
    client: ScenarioClient,
    args: ScenarioArgs,
) -> Result<(), ScenarioError> {
    let cycle_delay = args.get_u64(0, "cycle_delay", 10);
    let run_once = args.get_flag(1, "run_once");
    let ttl = 600;

    client.connect().await?;
    let hello = client.hello(None).await?;
    let uaid = hello.uaid;
    let reg = client.register(&random_channel_id()).await?;

    loop {
        let data = random_data(2048, 4096);
        let length = data.len() as i64;
        let _ = client
            .send_notification(&reg.push_endpoint, Some(data), ttl, None)
            .await?;
        client.counter("notification.throughput.bytes", length).await?;
        client.counter("notification.sent", 1).await?;
        client
            .expect_notification(&reg.channel_id, Duration::from_secs(2))
            .await?
            .ok_or_else(|| ScenarioError::failed("needed notification"))?;

        client.disconnect().await?;
        client.wait_secs(cycle_delay).await?;
        client.connect().await?;
        let hello = client.hello(Some(&uaid)).await?;
        if hello.uaid != uaid {
            return Err(ScenarioError::failed("uaid changed across reconnect"));
        }
        let notification = client
            .expect_notification(&reg.channel_id, Duration::from_secs(10))
            .await?
            .ok_or_else(|| ScenarioError::failed("needed notification"))?;
        client.ack(&reg.channel_id, &notification.version).await?;

        if run_once {
            client.unregister(&reg.channel_id).await?;
            client.disconnect().await?;
            break;
        }
    }
    Ok(())
}

/// Round trips on a channel whose unsubscribe is deliberately skipped; the
/// name is historical and deliveries keep working.
async fn notification_forever_unsubscribed(
    client: ScenarioClient,
    args: ScenarioArgs,
) -> Result<(), ScenarioError> {
    let notif_delay = args.get_u64(0, "notif_delay", 30);
    let run_once = args.get_flag(1, "run_once");

    client.connect().await?;
    client.hello(None).await?;
    let reg = client.register(&random_channel_id()).await?;

    loop {
        let data = random_data(2048, 4096);
        let length = data.len() as i64;
        client.timer_start("update.latency").await?;
        let _ = client
            .send_notification(&reg.push_endpoint, Some(data), 60, None)
            .await?;
        client.counter("notification.throughput.bytes", length).await?;
        client.counter("notification.sent", 1).await?;
        let notification = client
            .expect_notification(&reg.channel_id, Duration::from_secs(5))
            .await?;
        client.counter("notification.received", 1).await?;
        client.timer_end("update.latency").await?;
        let notification =
            notification.ok_or_else(|| ScenarioError::failed("notification never arrived"))?;
        client
            .ack(&notification.channel_id, &notification.version)
            .await?;
        client.counter("notification.ack", 1).await?;
        client.wait_secs(notif_delay).await?;

        if run_once {
            client.unregister(&reg.channel_id).await?;
            client.disconnect().await?;
            break;
        }
    }
    Ok(())
}

/// Posts to endpoints whose token has been corrupted; 4xx replies expected.
async fn notification_forever_bad_tokens(
    client: ScenarioClient,
    args: ScenarioArgs,
) -> Result<(), ScenarioError> {
    let notif_delay = args.get_u64(0, "notif_delay", 30);
    let run_once = args.get_flag(1, "run_once");
    let token_length = args.get_u64(2, "token_length", 140) as usize;

    client.connect().await?;
    client.hello(None).await?;

    // Register only to learn a valid endpoint path shape.
    let reg = client.register(&random_channel_id()).await?;
    let mut endpoint = reg.push_endpoint;

    loop {
        endpoint = bad_push_endpoint(Some(&endpoint), Some(token_length));
        let data = random_data(2048, 4096);
        let length = data.len() as i64;
        let _ = client
            .send_notification(&endpoint, Some(data), 60, None)
            .await?;
        client.counter("notification.throughput.bytes", length).await?;
        client.counter("notification.sent", 1).await?;

        client.wait_secs(notif_delay).await?;
        if run_once {
            client.disconnect().await?;
            break;
        }
    }
    Ok(())
}

/// Posts to entirely bogus endpoints; delivery failures expected and
/// ignored.
async fn notification_forever_bad_endpoints(
    client: ScenarioClient,
    args: ScenarioArgs,
) -> Result<(), ScenarioError> {
    let notif_delay = args.get_u64(0, "notif_delay", 30);
    let run_once = args.get_flag(1, "run_once");

    client.connect().await?;
    client.hello(None).await?;

    loop {
        let endpoint = bad_push_endpoint(None, None);
        let data = random_data(2048, 4096);
        let length = data.len() as i64;
        let _ = client
            .send_notification(&endpoint, Some(data), 60, None)
            .await?;
        client.counter("notification.throughput.bytes", length).await?;
        client.counter("notification.sent", 1).await?;

        client.wait_secs(notif_delay).await?;
        if run_once {
            client.disconnect().await?;
            break;
        }
    }
    Ok(())
}

/// Run one pass of each API-exercising scenario, then stop.
async fn api_test(client: ScenarioClient, _args: ScenarioArgs) -> Result<(), ScenarioError> {
    let (qty, stagger, delay) = (1, 1, 0);
    let notif_delay = 2;
    let run_once = 1;

    client
        .spawn(&format!("scenarios:basic, {qty}, {stagger}, {delay}"))
        .await?;
    client
        .spawn(&format!(
            "scenarios:notification_forever_unsubscribed, {qty}, {stagger}, {delay}, {notif_delay}, {run_once}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:notification_forever_bad_tokens, {qty}, {stagger}, {delay}, {notif_delay}, {run_once}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:notification_forever_bad_endpoints, {qty}, {stagger}, {delay}, {notif_delay}, {run_once}"
        ))
        .await?;
    Ok(())
}

/// Run every forever scenario at once.
async fn loadtest(client: ScenarioClient, _args: ScenarioArgs) -> Result<(), ScenarioError> {
    let (qty, stagger, delay) = (1, 1, 0);
    let notif_delay = 2;

    client
        .spawn(&format!(
            "scenarios:connect_and_idle_forever, {qty}, {stagger}, {delay}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:reconnect_forever, {qty}, {stagger}, {delay}, {{\"reconnect_delay\": {notif_delay}}}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:register_forever, {qty}, {stagger}, {delay}, {{\"reg_delay\": {notif_delay}}}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:notification_forever, {qty}, {stagger}, {delay}, {{\"notif_delay\": {notif_delay}}}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:notification_forever_stored, {qty}, {stagger}, {delay}, {{\"qty_stored\": 30}}, {{\"ttl\": 300}}, {{\"notif_delay\": {notif_delay}}}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:notification_forever_unsubscribed, {qty}, {stagger}, {delay}, {{\"notif_delay\": {notif_delay}}}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:notification_forever_bad_tokens, {qty}, {stagger}, {delay}, {notif_delay}"
        ))
        .await?;
    client
        .spawn(&format!(
            "scenarios:notification_forever_bad_endpoints, {qty}, {stagger}, {delay}, {notif_delay}"
        ))
        .await?;
    Ok(())
}
