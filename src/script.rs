//! Embeds and renders the second- and third-stage shell scripts that run
//! inside the container runtime to finalize package configuration, per
//! §4.12 of the expanded spec (out of scope for the *core* per `spec.md`
//! §1, but the templating that stitches them together is plumbing the
//! filesystem model depends on for its pre-seeded `init`).
//!
//! Both stage bodies are external collaborators' text, embedded verbatim
//! via `include_str!`, the same way the teacher embeds `sql/pvsync.sql` in
//! `sync.rs`. Only the per-suite `sources.list` insertion between them is
//! templated, with `sailfish` — the teacher's existing dependency.

use anyhow::Result;
use sailfish::TemplateSimple;

const SECOND_STAGE: &str = include_str!("../templates/second_stage.sh");
const THIRD_STAGE: &str = include_str!("../templates/third_stage.sh");

#[derive(TemplateSimple)]
#[template(path = "sources_list.stpl")]
struct SourcesList<'a> {
    archive_url: &'a str,
    suites: &'a [String],
}

/// Renders the `init` script: the second-stage body, one `echo deb
/// <archive_url> <suite> main >> /etc/apt/sources.list` line per configured
/// suite, then the third-stage body, per `spec.md` §4.8.
pub fn render_init_script(archive_url: &str, suites: &[String]) -> Result<Vec<u8>> {
    let sources = SourcesList { archive_url, suites }.render_once()?;

    let mut script = String::with_capacity(SECOND_STAGE.len() + sources.len() + THIRD_STAGE.len());
    script.push_str(SECOND_STAGE);
    script.push_str(&sources);
    script.push_str(THIRD_STAGE);

    Ok(script.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stitches_one_sources_list_line_per_suite_between_the_stage_bodies() {
        let suites = vec!["bookworm".to_string(), "bookworm-updates".to_string()];
        let script = render_init_script("http://deb.example.org", &suites).unwrap();
        let text = String::from_utf8(script).unwrap();

        let second_stage_end = text.find("find /var/log").unwrap();
        let third_stage_start = text.find("Make suitable for VM use").unwrap();
        assert!(second_stage_end < third_stage_start);

        assert!(text.contains(
            "echo deb http://deb.example.org bookworm main >> /etc/apt/sources.list"
        ));
        assert!(text.contains(
            "echo deb http://deb.example.org bookworm-updates main >> /etc/apt/sources.list"
        ));
    }
}
