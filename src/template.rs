// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Generated file content.
//!
//! Render the server block and index page for a virtual host. The hostname is
//! substituted verbatim. Rendering is pure, writing the result anywhere is
//! the caller's job.

use crate::host::HostName;

use std::path::Path;

/// Render Nginx server block for target host.
///
/// Includes a PHP location block forwarding to `fastcgi_socket` if and only
/// if a socket is given, i.e., PHP was detected on the host.
pub fn render_server_block(
    host: &HostName,
    web_root: &Path,
    fastcgi_socket: Option<&str>,
) -> String {
    let index = match fastcgi_socket {
        Some(_) => "index.php index.html index.htm",
        None => "index.html index.htm",
    };

    let mut out = String::new();
    out.push_str("server {\n");
    out.push_str("    listen 80;\n");
    out.push_str("    listen [::]:80;\n");
    out.push('\n');
    out.push_str(&format!("    server_name {host};\n"));
    out.push_str(&format!("    root {};\n", web_root.display()));
    out.push_str(&format!("    index {index};\n"));
    out.push('\n');
    out.push_str("    location / {\n");
    out.push_str("        try_files $uri $uri/ =404;\n");
    out.push_str("    }\n");

    if let Some(socket) = fastcgi_socket {
        out.push('\n');
        out.push_str("    location ~ \\.php$ {\n");
        out.push_str("        include fastcgi_params;\n");
        out.push_str(
            "        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;\n",
        );
        out.push_str(&format!("        fastcgi_pass unix:{socket};\n"));
        out.push_str("    }\n");
    }

    out.push_str("}\n");
    out
}

/// Render index page for target host.
///
/// # Invariant
///
/// - First line is exactly the hostname. Reachability verification relies
///   on it to tell this host apart from a default server.
pub fn render_index_page(host: &HostName) -> String {
    format!("{host}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn server_block_without_php() -> anyhow::Result<()> {
        let host = HostName::new("test.local")?;
        let result = render_server_block(&host, Path::new("/var/www/test.local"), None);
        let expect = indoc! {r#"
            server {
                listen 80;
                listen [::]:80;

                server_name test.local;
                root /var/www/test.local;
                index index.html index.htm;

                location / {
                    try_files $uri $uri/ =404;
                }
            }
        "#};
        assert_eq!(result, expect);
        assert!(!result.contains("fastcgi"));

        Ok(())
    }

    #[test]
    fn server_block_with_php() -> anyhow::Result<()> {
        let host = HostName::new("test.local")?;
        let result = render_server_block(
            &host,
            Path::new("/var/www/test.local"),
            Some("/run/php/php8.2-fpm.sock"),
        );
        let expect = indoc! {r#"
            server {
                listen 80;
                listen [::]:80;

                server_name test.local;
                root /var/www/test.local;
                index index.php index.html index.htm;

                location / {
                    try_files $uri $uri/ =404;
                }

                location ~ \.php$ {
                    include fastcgi_params;
                    fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
                    fastcgi_pass unix:/run/php/php8.2-fpm.sock;
                }
            }
        "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn index_page_starts_with_host_name() -> anyhow::Result<()> {
        let host = HostName::new("test.local")?;
        let result = render_index_page(&host);
        assert_eq!(result.lines().next(), Some("test.local"));

        Ok(())
    }
}
