use stress_test::{stress_test_inventory, stress_test_scaling, BoxError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), BoxError> {

    // Run async stress tests
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            INVENTORY STRESS TESTS                           ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: few hosts, short history
    let stats = stress_test_inventory(4, 5, 50).await?;
    stats.print();

    // Test 2: few hosts, long history
    let stats = stress_test_inventory(4, 30, 100).await?;
    stats.print();

    // Test 3: many hosts
    let stats = stress_test_inventory(50, 10, 500).await?;
    stats.print();

    // Test 4: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (hosts)                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(20, 5).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
