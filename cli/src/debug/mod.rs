//! Script workers hosted under the debugger.

mod script;

pub(crate) use script::Script;

use cdp_bridge::DebuggerServer;
use color_eyre::eyre::{self, eyre};
use log::{debug, error, info, warn};
use script::{Outcome, Runner};
use std::io;
use std::sync::Arc;
use std::thread;

/// Script run when no file is given on the command line.
pub(crate) const SAMPLE: &str = r#"# counter.script
let total = 0
fn bump
  let step = 2
  total = total + step
end
call bump
call bump
print "total is " + total
sleep 1000
"#;

/// Runs every script `runs` times (0 meaning forever) on each of `workers`
/// threads, one debugger context per run.
pub(crate) fn run_workers(
    debugger: &Arc<dyn DebuggerServer>,
    scripts: &Arc<[Script]>,
    workers: usize,
    runs: u32,
) -> eyre::Result<()> {
    let handles = (0..workers)
        .map(|worker| {
            let debugger = Arc::clone(debugger);
            let scripts = Arc::clone(scripts);
            thread::Builder::new()
                .name(format!("script-worker-{worker}"))
                .spawn(move || worker_loop(&*debugger, &scripts, runs))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| eyre!("a script worker panicked"))?;
    }
    Ok(())
}

fn worker_loop(debugger: &dyn DebuggerServer, scripts: &[Script], runs: u32) {
    let mut done = 0;
    while runs == 0 || done < runs {
        done += 1;
        for script in scripts {
            let context = match debugger.add_context() {
                Ok(context) => context,
                Err(err) => {
                    error!("cannot register a debugger context: {err}");
                    return;
                }
            };
            info!("running {} in context {context}", script.url());

            match Runner::new(script, debugger, context, io::stdout()).run() {
                Outcome::Finished => debug!("{} finished", script.url()),
                Outcome::Aborted => warn!("{} aborted by the debugger", script.url()),
                Outcome::Thrown(value) => warn!("{}: uncaught {value}", script.url()),
                Outcome::Failed(message) => error!("{message}"),
            }

            if let Err(err) = debugger.remove_context(context) {
                debug!("context {context} already gone: {err}");
            }
        }
    }
}
