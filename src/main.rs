use std::sync::Arc;
use std::time::Duration;

use hierlock::common::{LogicalPageId, ObjectId, TransactionId};
use hierlock::lock::{DataLockMode, ObjectLockMode};
use hierlock::manager::{DatabaseLockManager, GlobalLockManager};
use hierlock::Result;
use tracing_subscriber::EnvFilter;

const TIMEOUT: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Hierlock - A hierarchical lock manager");
    println!("======================================\n");

    let global = Arc::new(GlobalLockManager::new());
    let manager = DatabaseLockManager::new(Arc::clone(&global), "01")?;
    let object = ObjectId::new(1);
    let page = LogicalPageId::new(1);
    let t5 = TransactionId::new(5);
    let t6 = TransactionId::new(6);

    let block5 = manager.get_or_create_data_owner_block(t5, object, 100)?;
    let block6 = manager.get_or_create_data_owner_block(t6, object, 100)?;

    // Strengthen in place
    for mode in [DataLockMode::Shared, DataLockMode::Update, DataLockMode::Exclusive] {
        block5.lock_item(page, mode, TIMEOUT)?;
        println!("{} holds {} on {}", t5, mode, page);
    }
    block5.unlock_item(page, DataLockMode::None)?;
    println!("{} unlocked {}\n", t5, page);

    // Shared readers coexist
    block6.lock_item(page, DataLockMode::Shared, TIMEOUT)?;
    block5.lock_item(page, DataLockMode::Shared, TIMEOUT)?;
    println!("{} and {} both hold Shared on {}", t5, t6, page);

    block6.lock_item(page, DataLockMode::Update, TIMEOUT)?;
    println!("{} upgraded to Update", t6);

    report(t5, "Update", block5.lock_item(page, DataLockMode::Update, TIMEOUT));
    report(t6, "Exclusive", block6.lock_item(page, DataLockMode::Exclusive, TIMEOUT));

    block5.unlock_item(page, DataLockMode::None)?;
    println!("{} unlocked {}", t5, page);
    block6.lock_item(page, DataLockMode::Exclusive, TIMEOUT)?;
    println!("{} holds Exclusive on {}\n", t6, page);

    println!(
        "{} intent on {}: IntentExclusive = {}",
        t6,
        object,
        block6.has_owner_lock(ObjectLockMode::IntentExclusive)?
    );

    manager.release_transaction(t5)?;
    manager.release_transaction(t6)?;

    let counts = manager.lock_counts();
    println!("\nLive locks after release: {:?}", counts);
    println!("\nDemo completed successfully!");
    Ok(())
}

fn report(txn: TransactionId, mode: &str, result: Result<()>) {
    match result {
        Ok(()) => println!("{} acquired {}", txn, mode),
        Err(e) => println!("{} failed to acquire {}: {}", txn, mode, e),
    }
}
