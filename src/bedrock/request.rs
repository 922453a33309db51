//! Request body of `RetrieveAndGenerateStream`.

use serde::Serialize;

use crate::config::{ChatConfig, ModelConfig};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveAndGenerateRequest {
    pub input: TextInput,
    pub retrieve_and_generate_configuration: RetrieveAndGenerateConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextInput {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveAndGenerateConfiguration {
    #[serde(rename = "type")]
    pub kind: String,
    pub knowledge_base_configuration: KnowledgeBaseConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfiguration {
    pub knowledge_base_id: String,
    pub model_arn: String,
    pub generation_configuration: GenerationConfiguration,
    pub retrieval_configuration: RetrievalConfiguration,
    pub orchestration_configuration: OrchestrationConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfiguration {
    pub inference_config: InferenceConfig,
    pub prompt_template: PromptTemplate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail_configuration: Option<GuardrailConfiguration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationConfiguration {
    pub inference_config: InferenceConfig,
    pub prompt_template: PromptTemplate,
    pub query_transformation_configuration: QueryTransformationConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub text_inference_config: TextInferenceConfig,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub text_prompt_template: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailConfiguration {
    pub guardrail_id: String,
    pub guardrail_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryTransformationConfiguration {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfiguration {
    pub vector_search_configuration: VectorSearchConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchConfiguration {
    pub override_search_type: String,
    pub number_of_results: u32,
    pub reranking_configuration: RerankingConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankingConfiguration {
    #[serde(rename = "type")]
    pub kind: String,
    pub bedrock_reranking_configuration: BedrockRerankingConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BedrockRerankingConfiguration {
    pub model_configuration: RerankModelConfiguration,
    pub number_of_reranked_results: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankModelConfiguration {
    pub model_arn: String,
}

impl From<ModelConfig> for InferenceConfig {
    fn from(model: ModelConfig) -> Self {
        Self {
            text_inference_config: TextInferenceConfig {
                max_tokens: model.max_tokens,
                temperature: model.temp,
                top_p: model.top_p,
            },
        }
    }
}

impl RetrieveAndGenerateRequest {
    /// Assemble the request for one turn. Prompts are passed in already
    /// filled; `session_id` continues an earlier conversation.
    pub fn build(
        config: &ChatConfig,
        question: &str,
        session_id: Option<&str>,
        generation_prompt: &str,
        orchestration_prompt: &str,
    ) -> Self {
        let guardrail_configuration = if config.enable_guardrails {
            config
                .guardrail_id
                .clone()
                .zip(config.guardrail_version.clone())
                .map(|(guardrail_id, guardrail_version)| GuardrailConfiguration {
                    guardrail_id,
                    guardrail_version,
                })
        } else {
            None
        };

        Self {
            input: TextInput {
                text: question.to_string(),
            },
            retrieve_and_generate_configuration: RetrieveAndGenerateConfiguration {
                kind: "KNOWLEDGE_BASE".to_string(),
                knowledge_base_configuration: KnowledgeBaseConfiguration {
                    knowledge_base_id: config.kb_id.clone(),
                    model_arn: config.generation_model_arn(),
                    generation_configuration: GenerationConfiguration {
                        inference_config: config.generation_config.model_config.into(),
                        prompt_template: PromptTemplate {
                            text_prompt_template: generation_prompt.to_string(),
                        },
                        guardrail_configuration,
                    },
                    retrieval_configuration: RetrievalConfiguration {
                        vector_search_configuration: VectorSearchConfiguration {
                            override_search_type: config.search_type.clone(),
                            number_of_results: config.n_source_chunks,
                            reranking_configuration: RerankingConfiguration {
                                kind: "BEDROCK_RERANKING_MODEL".to_string(),
                                bedrock_reranking_configuration: BedrockRerankingConfiguration {
                                    model_configuration: RerankModelConfiguration {
                                        model_arn: config.rerank_model_arn(),
                                    },
                                    number_of_reranked_results: config.n_re_ranked_docs,
                                },
                            },
                        },
                    },
                    orchestration_configuration: OrchestrationConfiguration {
                        inference_config: config.orchestration_config.model_config.into(),
                        prompt_template: PromptTemplate {
                            text_prompt_template: orchestration_prompt.to_string(),
                        },
                        query_transformation_configuration: QueryTransformationConfiguration {
                            kind: config.query_split_type.clone(),
                        },
                    },
                },
            },
            session_id: session_id.map(str::to_string),
        }
    }
}
