use anyhow::Result;
use clap::Parser;
use limb_controller::{
    arm::Arm,
    arm_config::ArmConfig,
    clock::MonotonicClock,
    end_effector::Gripper,
    goal::{Goal, Waypoint},
    group::{Gains, SimulatedGroup},
    impedance::ImpedanceController,
    plugin::EffortOffset,
};
use limb_sim::{error::load_config, logging};
use nalgebra as na;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::time::{interval, MissedTickBehavior};

const GAINS_ATTEMPTS: usize = 5;

#[derive(Parser)]
#[command(author, version)]
struct Args {
    /// Arm config file, json or yaml. Uses the included arm if not set
    #[arg(short, long)]
    config: Option<String>,

    /// Seconds to run for, runs until Ctrl+c if not set
    #[arg(short, long)]
    duration: Option<f64>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Goals the demo cycles through.
///
/// Reaches for a point in front of the arm with the gripper closed, then goes home and opens it.
fn demo_goals(arm: &Arm, with_gripper: bool) -> Result<Vec<Goal>> {
    let dof = arm.size();
    let home = na::DVector::zeros(dof);
    let reach_seed = na::DVector::from_element(dof, 0.3);
    let target = arm.fk(&reach_seed)?.xyz + na::Vector3::new(0.05, 0.0, -0.05);
    let reach = arm.ik_target_xyz(&reach_seed, &target)?;
    tracing::info!("Reaching for {:?} with {:?}", target.as_slice(), reach.as_slice());

    let mut goals = vec![];
    for (position, gripper) in [(reach, 1.0), (home, 0.0)] {
        let mut waypoint = Waypoint::new().position(position.as_slice()).at(2.0);
        if with_gripper {
            waypoint = waypoint.aux(&[gripper]);
        }
        let mut goal = Goal::new(dof);
        goal.add_waypoint(waypoint)?;
        goals.push(goal);
    }
    Ok(goals)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ArmConfig::included(),
    };
    let robot_model = config.robot_model()?;
    let group = SimulatedGroup::new(config.dof_count());
    let mut arm = Arm::create(
        &config,
        Box::new(MonotonicClock::new()),
        Box::new(group),
        Box::new(robot_model),
    )?;

    if !arm.load_gains(&Gains::included_arm(), GAINS_ATTEMPTS) {
        tracing::warn!("Running with default arm gains");
    }
    if let Some(gripper_config) = &config.gripper {
        let mut gripper = Gripper::from_config(Box::new(SimulatedGroup::new(1)), gripper_config)?;
        if !gripper.load_gains(&Gains::included_gripper(), GAINS_ATTEMPTS) {
            tracing::warn!("Running with default gripper gains");
        }
        arm.set_end_effector(Box::new(gripper));
    }
    if let Some(impedance) = &config.impedance {
        arm.add_plugin(Box::new(ImpedanceController::from_config(impedance)))?;
    }
    if let Some(offsets) = &config.effort_offset {
        arm.add_plugin(Box::new(EffortOffset::per_joint(offsets)))?;
    }

    let goals = demo_goals(&arm, config.gripper.is_some())?;

    let keep_running = Arc::new(AtomicBool::new(true));

    tokio::spawn({
        let keep_running = keep_running.clone();
        async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to wait for Ctrl+c: {}", error);
            }
            tracing::info!("Detected Ctrl+c");
            keep_running.store(false, Ordering::Relaxed);
        }
    });

    let mut ticker = interval(config.control_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let mut next_goal = 0;
    let mut failed_ticks = 0_u64;

    while keep_running.load(Ordering::Relaxed) {
        ticker.tick().await;
        if let Some(duration) = args.duration {
            if started.elapsed().as_secs_f64() >= duration {
                break;
            }
        }

        // an idle arm with a gripper fails the update but still has a command to send
        let updated = arm.update();
        let sent = arm.send();
        if !(updated && sent) {
            failed_ticks += 1;
        }

        if arm.trajectory().is_none() || arm.at_goal() {
            let goal = &goals[next_goal % goals.len()];
            arm.set_goal(goal)?;
            next_goal += 1;
            tracing::info!(
                "Goal {} started at {:?}",
                next_goal,
                arm.last_feedback().position.as_slice()
            );
        }
    }

    arm.cancel_goal();
    tracing::info!(
        "Stopped after {} goals with {} failed ticks",
        next_goal,
        failed_ticks
    );
    Ok(())
}
