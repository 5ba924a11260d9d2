pub fn render_schema(embedding_dim: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<EMBEDDING_DIM>", &embedding_dim.to_string())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_identities.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_identities.sql")),
				"tables/002_embeddings.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_embeddings.sql")),
				"tables/003_gallery_meta.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_gallery_meta.sql")),
				"tables/004_users.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_users.sql")),
				"tables/005_password_history.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_password_history.sql")),
				"tables/006_login_attempts.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_login_attempts.sql")),
				"tables/007_sessions.sql" =>
					out.push_str(include_str!("../../../sql/tables/007_sessions.sql")),
				"tables/008_activity_log.sql" =>
					out.push_str(include_str!("../../../sql/tables/008_activity_log.sql")),
				"tables/009_match_results.sql" =>
					out.push_str(include_str!("../../../sql/tables/009_match_results.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
