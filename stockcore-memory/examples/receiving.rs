//! Receiving a purchase order and transferring part of it, end to end.
//!
//! Run with `cargo run --example receiving`.

use stockcore::movement::MovementKind;
use stockcore::store::MovementFilter;
use stockcore::types::{ProductId, WarehouseId};
use stockcore::{LedgerStore, MovementApplier, MovementRequest};
use stockcore_memory::InMemoryLedgerStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let applier = MovementApplier::new(InMemoryLedgerStore::new());

    let widget = ProductId::try_new("widget-001")?;
    let main = WarehouseId::try_new("warehouse-main")?;
    let west = WarehouseId::try_new("warehouse-west")?;

    // Receive a two-line purchase order.
    let outcome = applier
        .apply_batch(vec![
            MovementRequest::new(widget.clone(), main.clone(), 100, MovementKind::Receipt)
                .with_reference("purchase_order", "PO-1001"),
            MovementRequest::new(widget.clone(), main.clone(), 20, MovementKind::Receipt)
                .with_reference("purchase_order", "PO-1001")
                .with_notes("second pallet, damaged box excluded"),
        ])
        .await;
    println!("received PO-1001: all_succeeded={}", outcome.all_succeeded);

    // Move 30 units to the west warehouse: two independent movements.
    let out = applier
        .apply(MovementRequest::new(
            widget.clone(),
            main.clone(),
            -30,
            MovementKind::TransferOut,
        ))
        .await?;
    let into = applier
        .apply(MovementRequest::new(
            widget.clone(),
            west,
            30,
            MovementKind::TransferIn,
        ))
        .await?;
    println!(
        "transfer: {} now {}, destination now {}",
        main, out.after_on_hand, into.after_on_hand
    );

    // The audit trail reconciles against current state.
    for record in applier.store().snapshot().await? {
        let movements = applier
            .store()
            .movements(&MovementFilter::new().for_key(record.key.clone()))
            .await?;
        let replayed = stockcore::replay_on_hand(&movements, &record.key);
        println!(
            "{}: on_hand={} replayed={} ({} movements)",
            record.key,
            record.on_hand,
            replayed,
            movements.len()
        );
        assert_eq!(record.on_hand, replayed);
    }

    Ok(())
}
