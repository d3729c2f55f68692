use crate::artifacts::Artifact;
use crate::logging::LogLevel;
use crate::message::Transcript;
use crate::model::{LanguageModel, QualityTier, RequestOptions};

use super::{extract_content, Step, StepEnv, StepError};

const NAME: &str = "Write plot";
pub const PLOT_MARKER: &str = "Step 2:";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PlotPhase {
    SystemMessage,
    Draft,
    Refine { round: u32 },
    Done,
}

/// Drafts a plot from the description and refines it a fixed number of
/// times. Each refinement keeps only the text after [`PLOT_MARKER`].
pub struct WritePlotStep<'a> {
    env: StepEnv<'a>,
    phase: PlotPhase,
    transcript: Transcript,
    rounds: u32,
    description: String,
    plot: String,
}

impl<'a> WritePlotStep<'a> {
    pub fn new(env: StepEnv<'a>, rounds: u32) -> Self {
        Self {
            env,
            phase: PlotPhase::SystemMessage,
            transcript: Transcript::new(),
            rounds,
            description: String::new(),
            plot: String::new(),
        }
    }

    fn options(&self) -> RequestOptions {
        RequestOptions::new(QualityTier::Advanced)
    }

    fn after_round(&self, completed: u32) -> Result<PlotPhase, StepError> {
        if completed < self.rounds {
            return Ok(PlotPhase::Refine { round: completed + 1 });
        }
        let path = self.env.artifacts.write(Artifact::Plot, &self.plot)?;
        self.env
            .log(LogLevel::Info, format!("Plot written to {}.", path.display()));
        Ok(PlotPhase::Done)
    }
}

impl Step for WritePlotStep<'_> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_complete(&self) -> bool {
        self.phase == PlotPhase::Done
    }

    fn advance(&mut self, model: &dyn LanguageModel) -> Result<(), StepError> {
        if self.is_complete() {
            return Ok(());
        }
        if self.env.already_produced(NAME, Artifact::Plot)? {
            self.phase = PlotPhase::Done;
            return Ok(());
        }

        self.phase = match self.phase {
            PlotPhase::SystemMessage => {
                self.transcript
                    .push(self.env.system_message("write_plot_system_message")?);
                PlotPhase::Draft
            }
            PlotPhase::Draft => {
                self.env.log(LogLevel::Info, "Drafting the plot...");
                self.description = self.env.artifacts.read_description()?.trim().to_string();
                let mut branch = self.transcript.branch();
                branch.push(
                    self.env
                        .user_message("write_plot_prompt", &[self.description.as_str()])?,
                );
                let reply = self.env.request(NAME, model, &branch, self.options())?;
                self.plot = reply.content;
                self.after_round(0)?
            }
            PlotPhase::Refine { round } => {
                self.env.log(
                    LogLevel::Info,
                    format!("Refining plot, iteration {round}/{}", self.rounds),
                );
                let mut branch = self.transcript.branch();
                branch.push(self.env.user_message(
                    "write_refined_plot",
                    &[self.description.as_str(), self.plot.as_str()],
                )?);
                let reply = self.env.request(NAME, model, &branch, self.options())?;
                let refined = extract_content(&reply.content, PLOT_MARKER).ok_or(
                    StepError::MissingMarker {
                        step: NAME,
                        marker: PLOT_MARKER,
                    },
                )?;
                self.plot = refined.to_string();
                self.after_round(round)?
            }
            PlotPhase::Done => PlotPhase::Done,
        };
        Ok(())
    }
}
