//! `companion plan`: show the session plan, optionally recomputing it.

pub async fn run(refresh: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (config, orchestrator) = super::bootstrap().await?;

    let plan = if refresh {
        let conversation = orchestrator.root().context().conversation();
        let plan = orchestrator
            .run_planner(orchestrator.current_plan().as_deref(), &conversation)
            .await?;
        orchestrator
            .store()
            .set(&config.orchestrator.plan_key, plan.clone())
            .await?;
        plan
    } else {
        orchestrator.current_plan().unwrap_or_default()
    };

    if plan.trim().is_empty() {
        println!("(the planner returned an empty plan)");
    } else {
        println!("{plan}");
    }

    orchestrator.shutdown().await;
    Ok(())
}
