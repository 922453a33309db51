//! The single chat page served at `/`.
//!
//! Plain HTML with an inline script talking to the JSON API; no bundler and
//! no external assets.

/// Generate the HTML shell for the application.
pub fn html_shell(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="Chat with a Bedrock knowledge base">
    <title>{title} - KB Chat</title>
    <style>{STYLE}</style>
</head>
<body>
    <div id="app-shell">
        {content}
    </div>
    <script>{SCRIPT}</script>
</body>
</html>"#
    )
}

/// Chat page content: sidebar with prompts and conversation controls, the
/// transcript, and the question box.
pub fn chat_content() -> &'static str {
    r#"
    <aside id="sidebar">
        <h2>KB Chat</h2>
        <label for="conversation-name">Session name</label>
        <input id="conversation-name" type="text" maxlength="50">
        <span id="name-status" class="muted"></span>
        <button id="clear-chat" type="button">Clear chat</button>

        <details>
            <summary>Prompts</summary>
            <form id="prompt-form">
                <label for="generation-prompt">Generation prompt</label>
                <textarea id="generation-prompt" name="generation_prompt" rows="10"></textarea>
                <p class="muted">Must keep <code>$search_results$</code>.</p>
                <label for="orchestration-prompt">Orchestration prompt</label>
                <textarea id="orchestration-prompt" name="orchestration_prompt" rows="10"></textarea>
                <p class="muted">Must keep <code>$conversation_history$</code> and <code>$output_format_instructions$</code>.</p>
                <button type="submit">Save prompts</button>
                <span id="prompt-status" class="muted"></span>
            </form>
        </details>

        <details>
            <summary>Conversations</summary>
            <ul id="conversation-list"></ul>
        </details>
    </aside>

    <main id="chat">
        <div id="transcript"></div>
        <form id="chat-form">
            <textarea name="message" rows="2" placeholder="Ask questions about your data" required></textarea>
            <button type="submit">Send</button>
        </form>
        <p id="chat-status" class="muted"></p>
    </main>
    "#
}

/// Full chat page.
pub fn chat_page() -> String {
    html_shell("Chat", chat_content())
}

const STYLE: &str = r"
* { box-sizing: border-box; }
body { margin: 0; font-family: system-ui, sans-serif; color: #1f2328; background: #f6f8fa; }
#app-shell { display: flex; height: 100vh; }
#sidebar { width: 300px; padding: 1rem; background: #fff; border-right: 1px solid #d0d7de; overflow-y: auto; }
#sidebar textarea { width: 100%; font-family: monospace; font-size: 0.8rem; }
#conversation-name { width: 100%; margin: 0.25rem 0 0.5rem; padding: 0.25rem; font: inherit; }
#chat { flex: 1; display: flex; flex-direction: column; padding: 1rem; }
#transcript { flex: 1; overflow-y: auto; }
.turn { max-width: 900px; margin: 0 auto 1rem; padding: 0.75rem 1rem; border-radius: 12px; background: #fff; }
.turn.user { background: #ddf4ff; }
.turn .body a[target=_self] { font-size: 0.75em; vertical-align: super; text-decoration: none; }
.citations { margin-top: 0.75rem; display: flex; flex-wrap: wrap; gap: 0.5rem; }
.citations details { border: 1px solid #d0d7de; border-radius: 8px; padding: 0.25rem 0.5rem; max-width: 100%; }
.citations details[open] { flex-basis: 100%; background: #f6f8fa; }
.citations .source { font-size: 0.8rem; color: #57606a; word-break: break-all; }
#chat-form { display: flex; gap: 0.5rem; max-width: 900px; width: 100%; margin: 0 auto; }
#chat-form textarea { flex: 1; padding: 0.5rem; font: inherit; }
.muted { color: #57606a; font-size: 0.85rem; }
.error { color: #cf222e; }
";

const SCRIPT: &str = r##"
(function () {
    const KEY = "kb-chat.conversation";
    const transcript = document.getElementById("transcript");
    const chatForm = document.getElementById("chat-form");
    const chatStatus = document.getElementById("chat-status");
    const promptForm = document.getElementById("prompt-form");
    const promptStatus = document.getElementById("prompt-status");
    const nameInput = document.getElementById("conversation-name");
    const nameStatus = document.getElementById("name-status");
    let conversationId = localStorage.getItem(KEY);

    // Answers are stored with "$" escaped for math-aware renderers; this page has none.
    const unescapeDollars = (s) => s.replaceAll("\\$", "$");

    function fileName(source) {
        const parts = source.split("/");
        return parts[parts.length - 1] || source;
    }

    function renderTurn(turn) {
        const el = document.createElement("div");
        el.className = "turn " + turn.role;
        const body = document.createElement("div");
        body.className = "body";
        if (turn.role === "user") {
            body.textContent = turn.text;
        } else {
            // The server keeps only citation and URL anchors and <br>; markers
            // point at #ref-N, scope them to this turn.
            body.innerHTML = unescapeDollars(turn.text)
                .replaceAll('href="#ref-', 'href="#ref-' + turn.unique_id + "-")
                .replaceAll("\n", "<br>");
        }
        el.appendChild(body);

        if (turn.references && turn.references.length > 0) {
            const strip = document.createElement("div");
            strip.className = "citations";
            for (const ref of turn.references) {
                const pop = document.createElement("details");
                pop.id = "ref-" + turn.unique_id + "-" + ref.id;
                const summary = document.createElement("summary");
                summary.textContent = "[" + ref.id + "]";
                const text = document.createElement("p");
                text.textContent = unescapeDollars(ref.text);
                const source = document.createElement("p");
                source.className = "source";
                source.textContent = fileName(ref.source) + " (" + ref.source + ")";
                pop.append(summary, text, source);
                strip.appendChild(pop);
            }
            el.appendChild(strip);
        }

        transcript.appendChild(el);
        transcript.scrollTop = transcript.scrollHeight;
    }

    transcript.addEventListener("click", (event) => {
        const link = event.target.closest('a[target="_self"]');
        if (!link) return;
        const target = document.getElementById(link.getAttribute("href").slice(1));
        if (target) target.open = true;
    });

    async function api(method, path, body) {
        const res = await fetch(path, {
            method,
            headers: body ? { "content-type": "application/json" } : {},
            body: body ? JSON.stringify(body) : undefined,
        });
        if (!res.ok) {
            const message = await res.text();
            throw new Error(message || res.statusText);
        }
        return res.status === 204 ? null : res.json();
    }

    async function loadConversation() {
        transcript.replaceChildren();
        if (!conversationId) {
            const created = await api("POST", "/api/conversations");
            conversationId = created.id;
            localStorage.setItem(KEY, conversationId);
        }
        try {
            const turns = await api("GET", "/api/conversations/" + conversationId + "/turns");
            turns.forEach(renderTurn);
        } catch (_) {
            localStorage.removeItem(KEY);
            conversationId = null;
            return loadConversation();
        }
        await loadPrompts();
        await loadConversations();
    }

    async function loadPrompts() {
        const prompts = await api("GET", "/api/conversations/" + conversationId + "/prompts");
        promptForm.generation_prompt.value = prompts.generation_prompt;
        promptForm.orchestration_prompt.value = prompts.orchestration_prompt;
    }

    async function loadConversations() {
        const list = document.getElementById("conversation-list");
        const all = await api("GET", "/api/conversations");
        list.replaceChildren();
        for (const c of all) {
            const item = document.createElement("li");
            item.textContent = c.name + " (" + c.turn_count + ")";
            if (c.id === conversationId) {
                item.style.fontWeight = "bold";
                if (document.activeElement !== nameInput) nameInput.value = c.name;
            }
            item.addEventListener("click", () => {
                conversationId = c.id;
                localStorage.setItem(KEY, conversationId);
                loadConversation();
            });
            list.appendChild(item);
        }
    }

    chatForm.addEventListener("submit", async (event) => {
        event.preventDefault();
        const message = chatForm.message.value.trim();
        if (!message) return;
        chatForm.message.value = "";
        renderTurn({ role: "user", text: message, references: [] });
        chatStatus.textContent = "Thinking...";
        chatStatus.classList.remove("error");
        try {
            const answer = await api("POST", "/api/chat", { message, conversation_id: conversationId });
            conversationId = answer.conversation_id;
            localStorage.setItem(KEY, conversationId);
            renderTurn({
                role: "assistant",
                text: answer.text,
                references: answer.references,
                unique_id: answer.unique_id,
            });
            chatStatus.textContent = "";
            loadConversations();
        } catch (err) {
            chatStatus.textContent = err.message;
            chatStatus.classList.add("error");
        }
    });

    chatForm.message.addEventListener("keydown", (event) => {
        if (event.key === "Enter" && !event.shiftKey) {
            event.preventDefault();
            chatForm.requestSubmit();
        }
    });

    promptForm.addEventListener("submit", async (event) => {
        event.preventDefault();
        try {
            await api("PUT", "/api/conversations/" + conversationId + "/prompts", {
                generation_prompt: promptForm.generation_prompt.value,
                orchestration_prompt: promptForm.orchestration_prompt.value,
            });
            promptStatus.textContent = "Saved";
        } catch (err) {
            promptStatus.textContent = err.message;
        }
    });

    nameInput.addEventListener("change", async () => {
        if (!conversationId) return;
        try {
            const renamed = await api("PUT", "/api/conversations/" + conversationId + "/name", {
                name: nameInput.value,
            });
            nameInput.value = renamed.name;
            nameStatus.textContent = "";
            loadConversations();
        } catch (err) {
            nameStatus.textContent = err.message;
        }
    });

    document.getElementById("clear-chat").addEventListener("click", async () => {
        if (conversationId) {
            await api("POST", "/api/conversations/" + conversationId + "/clear").catch(() => {
                localStorage.removeItem(KEY);
                conversationId = null;
            });
        }
        await loadConversation();
    });

    loadConversation();
})();
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_page_contains_app_parts() {
        let page = chat_page();

        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<title>Chat - KB Chat</title>"));
        assert!(page.contains(r#"id="chat-form""#));
        assert!(page.contains(r#"id="prompt-form""#));
        assert!(page.contains("/api/chat"));
        assert!(page.contains(r#"id="conversation-name" type="text" maxlength="50""#));
        assert!(page.contains(r#""/clear""#));
    }
}
