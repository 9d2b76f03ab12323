//! Terminal rendering of the subscription flow.

use std::{
    collections::BTreeSet,
    io::{BufRead, Write},
};

use anyhow::{anyhow, bail, Result};
use client_core::{FlowError, FlowState, FlowStep, SubscriptionFlow};
use shared::domain::TeamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Toggle(TeamId),
    Done,
    Invalid,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.eq_ignore_ascii_case("done") {
        return Command::Done;
    }
    match line.parse::<i64>() {
        Ok(id) => Command::Toggle(TeamId(id)),
        Err(_) => Command::Invalid,
    }
}

/// Loose shape check standing in for an email input control.
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, label: &str) -> Result<Option<String>> {
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn report<W: Write>(out: &mut W, state: &FlowState, err: &FlowError) -> Result<()> {
    match &state.error {
        Some(message) => writeln!(out, "Error: {message}")?,
        None => writeln!(out, "Error: {err}")?,
    }
    Ok(())
}

pub fn render_catalog<W: Write>(state: &FlowState, out: &mut W) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "Select your teams")?;
    for team in &state.teams {
        let mark = if state.is_selected(team.id) { 'x' } else { ' ' };
        writeln!(
            out,
            "  [{mark}] {:>3}  {} ({})",
            team.id, team.full_name, team.abbreviation
        )?;
    }
    Ok(())
}

pub fn render_confirmation<W: Write>(out: &mut W) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "You're all set!")?;
    writeln!(
        out,
        "Thank you for subscribing. You'll start receiving updates about your favorite teams soon."
    )?;
    Ok(())
}

pub async fn run_interactive<R: BufRead, W: Write>(
    flow: &mut SubscriptionFlow,
    input: &mut R,
    out: &mut W,
) -> Result<()> {
    while flow.step() == FlowStep::Subscribe {
        let Some(line) = prompt(input, out, "Email: ")? else {
            bail!("input closed before subscribing");
        };
        if !is_plausible_email(&line) {
            writeln!(out, "Please enter a valid email address.")?;
            continue;
        }
        if let Err(err) = flow.submit_email(&line).await {
            report(out, flow.state(), &err)?;
        }
    }

    while flow.step() == FlowStep::SelectTeams {
        render_catalog(flow.state(), out)?;
        let Some(line) = prompt(input, out, "Team id to toggle, or 'done': ")? else {
            bail!("input closed before saving teams");
        };
        match parse_command(&line) {
            Command::Toggle(team_id) => {
                if let Err(err) = flow.toggle_team(team_id) {
                    writeln!(out, "Error: {err}")?;
                }
            }
            Command::Done if !flow.can_submit_teams() => {
                writeln!(out, "Select at least one team first.")?;
            }
            Command::Done => {
                if let Err(err) = flow.submit_teams().await {
                    report(out, flow.state(), &err)?;
                }
            }
            Command::Invalid => writeln!(out, "Enter a team id from the list or 'done'.")?,
        }
    }

    render_confirmation(out)
}

/// Subscribes `email` and replaces the followed teams with `team_ids`.
///
/// With no `team_ids` the teams the subscriber already follows are saved as-is.
pub async fn run_unattended<W: Write>(
    flow: &mut SubscriptionFlow,
    email: &str,
    team_ids: &[i64],
    out: &mut W,
) -> Result<()> {
    if !is_plausible_email(email) {
        bail!("'{email}' is not a valid email address");
    }
    flow.submit_email(email)
        .await
        .map_err(|err| anyhow!("subscription failed: {err}"))?;

    if !team_ids.is_empty() {
        let wanted: BTreeSet<TeamId> = team_ids.iter().copied().map(TeamId).collect();
        let current: Vec<TeamId> = flow.state().selection.iter().copied().collect();
        for team_id in current.into_iter().filter(|id| !wanted.contains(id)) {
            flow.toggle_team(team_id)?;
        }
        for team_id in wanted {
            if !flow.state().is_selected(team_id) {
                flow.toggle_team(team_id)?;
            }
        }
    }

    if !flow.can_submit_teams() {
        bail!("no teams selected; pass at least one --team <id>");
    }
    flow.submit_teams()
        .await
        .map_err(|err| anyhow!("saving teams failed: {err}"))?;

    render_confirmation(out)
}

#[cfg(test)]
#[path = "tests/wizard_tests.rs"]
mod tests;
